//! Minimal ISO 9660 extraction
//!
//! Reads the primary volume descriptor and, when present, the Joliet
//! supplementary descriptor. Rock Ridge names, symbolic links and relocated
//! directories are honoured on the primary tree; otherwise Joliet names are
//! used, and failing that the primary names with their `;1` version suffix
//! removed. Symbolic links must resolve inside the image.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const SECTOR_SIZE: u64 = 2048;
const FIRST_DESCRIPTOR: u64 = 16;
const MAX_DESCRIPTORS: u64 = 64;
const MAX_DEPTH: usize = 64;
const MAX_CONTINUATIONS: usize = 16;

#[derive(Error, Debug)]
pub enum IsoError {
    #[error("i/o failure reading image")]
    Io(#[from] io::Error),

    #[error("invalid image: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, IsoError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Naming {
    RockRidge { skip: usize },
    Joliet,
    Plain,
}

#[derive(Debug, Clone)]
struct Record {
    extent: u32,
    size: u32,
    flags: u8,
    name: Vec<u8>,
    system_use: Vec<u8>,
}

impl Record {
    fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 34 {
            return Err(IsoError::Invalid("directory record too short".to_string()));
        }
        let name_len = bytes[32] as usize;
        if 33 + name_len > bytes.len() {
            return Err(IsoError::Invalid("directory record name overflows".to_string()));
        }
        let mut system_use_start = 33 + name_len;
        if name_len % 2 == 0 {
            system_use_start += 1;
        }
        Ok(Self {
            extent: le_u32(&bytes[2..6]),
            size: le_u32(&bytes[10..14]),
            flags: bytes[25],
            name: bytes[33..33 + name_len].to_vec(),
            system_use: bytes.get(system_use_start..).unwrap_or_default().to_vec(),
        })
    }

    fn is_dir(&self) -> bool {
        self.flags & 0x02 != 0
    }

    fn is_self_or_parent(&self) -> bool {
        self.name == [0] || self.name == [1]
    }
}

#[derive(Debug, Default)]
struct RockRidge {
    name: Option<String>,
    symlink: Option<String>,
    /// Extent of the directory moved out of this place (`CL`)
    child_link: Option<u32>,
    relocated: bool,
}

struct Image {
    file: File,
    block_size: u64,
}

impl Image {
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn read_extent(&mut self, extent: u32, len: usize) -> Result<Vec<u8>> {
        self.read_at(extent as u64 * self.block_size, len)
    }

    fn read_directory(&mut self, record: &Record) -> Result<Vec<Record>> {
        let bytes = self.read_extent(record.extent, record.size as usize)?;
        let block = self.block_size as usize;
        let mut records = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let len = bytes[pos] as usize;
            if len == 0 {
                // Records never straddle a block; zero padding runs to the next one.
                pos = (pos / block + 1) * block;
                continue;
            }
            if pos + len > bytes.len() {
                return Err(IsoError::Invalid("directory record overflows extent".to_string()));
            }
            records.push(Record::parse(&bytes[pos..pos + len])?);
            pos += len;
        }
        Ok(records)
    }

    fn rock_ridge(&mut self, system_use: &[u8], skip: usize) -> Result<RockRidge> {
        let mut result = RockRidge::default();
        let mut name = String::new();
        let mut link = String::new();
        let mut link_separator = false;
        let mut area = system_use.get(skip..).unwrap_or_default().to_vec();

        for _ in 0..MAX_CONTINUATIONS {
            let mut continuation = None;
            let mut pos = 0;
            while pos + 4 <= area.len() {
                let signature = &area[pos..pos + 2];
                let len = area[pos + 2] as usize;
                if len < 4 || pos + len > area.len() {
                    break;
                }
                let entry = &area[pos..pos + len];
                match signature {
                    b"NM" if len >= 5 => {
                        let flags = entry[4];
                        if flags & 0x02 != 0 {
                            name.push('.');
                        } else if flags & 0x04 != 0 {
                            name.push_str("..");
                        } else {
                            name.push_str(&String::from_utf8_lossy(&entry[5..]));
                        }
                        result.name = Some(name.clone());
                    }
                    b"SL" if len >= 5 => {
                        let mut component = 5;
                        while component + 2 <= entry.len() {
                            let flags = entry[component];
                            let content_len = entry[component + 1] as usize;
                            let end = (component + 2 + content_len).min(entry.len());
                            let content = &entry[component + 2..end];
                            if flags & 0x08 != 0 {
                                link.push('/');
                                link_separator = false;
                            } else {
                                if link_separator {
                                    link.push('/');
                                }
                                if flags & 0x02 != 0 {
                                    link.push('.');
                                } else if flags & 0x04 != 0 {
                                    link.push_str("..");
                                } else {
                                    link.push_str(&String::from_utf8_lossy(content));
                                }
                                link_separator = flags & 0x01 == 0;
                            }
                            component = end;
                        }
                        result.symlink = Some(link.clone());
                    }
                    b"CL" if len >= 12 => result.child_link = Some(le_u32(&entry[4..8])),
                    b"RE" => result.relocated = true,
                    b"CE" if len >= 28 => {
                        continuation = Some((
                            le_u32(&entry[4..8]),
                            le_u32(&entry[12..16]),
                            le_u32(&entry[20..24]),
                        ));
                    }
                    b"ST" => break,
                    _ => {}
                }
                pos += len;
            }

            match continuation {
                Some((block, offset, len)) => {
                    let start = block as u64 * self.block_size + offset as u64;
                    area = self.read_at(start, len as usize)?;
                }
                None => break,
            }
        }
        Ok(result)
    }

    /// The `.` record of the directory starting at `extent`
    fn relocated_directory(&mut self, extent: u32) -> Result<Record> {
        let block = self.read_extent(extent, self.block_size as usize)?;
        let len = block[0] as usize;
        if len == 0 {
            return Err(IsoError::Invalid("empty relocated directory".to_string()));
        }
        let record = Record::parse(&block[..len])?;
        if !record.is_dir() || !record.is_self_or_parent() {
            return Err(IsoError::Invalid("child link does not point at a directory".to_string()));
        }
        Ok(record)
    }
}

/// Extract every file of the image at `image_path` into `destination`
pub fn extract(image_path: &Path, destination: &Path) -> Result<()> {
    let file = File::open(image_path)?;
    let mut image = Image {
        file,
        block_size: SECTOR_SIZE,
    };

    let mut primary = None;
    let mut joliet = None;
    for index in FIRST_DESCRIPTOR..FIRST_DESCRIPTOR + MAX_DESCRIPTORS {
        let descriptor = match image.read_at(index * SECTOR_SIZE, SECTOR_SIZE as usize) {
            Ok(descriptor) => descriptor,
            Err(_) => break,
        };
        if &descriptor[1..6] != b"CD001" {
            break;
        }
        match descriptor[0] {
            1 if primary.is_none() => {
                let block_size = le_u16(&descriptor[128..130]) as u64;
                if block_size != 0 {
                    image.block_size = block_size;
                }
                primary = Some(Record::parse(&descriptor[156..190])?);
            }
            2 if is_joliet(&descriptor[88..120]) => {
                joliet = Some(Record::parse(&descriptor[156..190])?);
            }
            255 => break,
            _ => {}
        }
    }

    let primary = primary.ok_or_else(|| IsoError::Invalid("no primary volume descriptor".to_string()))?;

    let (root, naming) = match rock_ridge_skip(&mut image, &primary)? {
        Some(skip) => (primary, Naming::RockRidge { skip }),
        None => match joliet {
            Some(joliet) => (joliet, Naming::Joliet),
            None => (primary, Naming::Plain),
        },
    };
    debug!(image = %image_path.display(), ?naming, "Reading disk image");

    let mut visited = HashSet::new();
    extract_directory(&mut image, &root, naming, destination, 0, &mut visited)
}

fn is_joliet(escape_sequences: &[u8]) -> bool {
    escape_sequences
        .windows(3)
        .any(|w| w == b"%/@" || w == b"%/C" || w == b"%/E")
}

/// The SUSP skip length when the root directory carries a Rock Ridge `SP` entry
fn rock_ridge_skip(image: &mut Image, root: &Record) -> Result<Option<usize>> {
    let records = image.read_directory(root)?;
    let Some(first) = records.first() else {
        return Ok(None);
    };
    let su = &first.system_use;
    if su.len() >= 7 && &su[0..2] == b"SP" && su[4] == 0xBE && su[5] == 0xEF {
        return Ok(Some(su[6] as usize));
    }
    Ok(None)
}

fn extract_directory(
    image: &mut Image,
    directory: &Record,
    naming: Naming,
    destination: &Path,
    depth: usize,
    visited: &mut HashSet<u32>,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(IsoError::Invalid("directory tree too deep".to_string()));
    }
    if !visited.insert(directory.extent) {
        return Err(IsoError::Invalid("directory loop".to_string()));
    }
    fs::create_dir_all(destination)?;

    for record in image.read_directory(directory)? {
        if record.is_self_or_parent() {
            continue;
        }

        let (name, symlink, child_link) = match naming {
            Naming::RockRidge { skip } => {
                let rr = image.rock_ridge(&record.system_use, skip)?;
                // Relocated directories are reached through their child link.
                if rr.relocated {
                    continue;
                }
                let name = rr.name.unwrap_or_else(|| plain_name(&record.name));
                (name, rr.symlink, rr.child_link)
            }
            Naming::Joliet => (joliet_name(&record.name), None, None),
            Naming::Plain => (plain_name(&record.name), None, None),
        };

        if !is_safe_name(&name) {
            warn!(name = %name, "Skipping disk image entry with unsafe name");
            continue;
        }
        let target = destination.join(&name);

        if let Some(link) = symlink {
            if link_stays_inside(&link, depth) {
                make_symlink(&link, &target)?;
            } else {
                warn!(name = %name, link = %link, "Skipping symbolic link pointing outside the image");
            }
        } else if let Some(extent) = child_link {
            let relocated = image.relocated_directory(extent)?;
            extract_directory(image, &relocated, naming, &target, depth + 1, visited)?;
        } else if record.is_dir() {
            extract_directory(image, &record, naming, &target, depth + 1, visited)?;
        } else {
            image
                .file
                .seek(SeekFrom::Start(record.extent as u64 * image.block_size))?;
            let mut output = File::create(&target)?;
            let copied = io::copy(&mut (&image.file).take(record.size as u64), &mut output)?;
            if copied != record.size as u64 {
                return Err(IsoError::Invalid(format!("truncated file {}", name)));
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn make_symlink(link: &str, target: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_symlink(link: &str, target: &Path) -> Result<()> {
    warn!(link, target = %target.display(), "Symbolic links are not supported on this platform");
    Ok(())
}

/// Whether a relative link placed `depth` directories below the image root
/// stays below that root
fn link_stays_inside(link: &str, depth: usize) -> bool {
    if link.starts_with('/') {
        return false;
    }
    let mut level = depth;
    for component in link.split('/') {
        match component {
            "" | "." => {}
            ".." => match level.checked_sub(1) {
                Some(parent) => level = parent,
                None => return false,
            },
            _ => level += 1,
        }
    }
    true
}

fn plain_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    let name = name.split(';').next().unwrap_or_default();
    name.strip_suffix('.').unwrap_or(name).to_string()
}

fn joliet_name(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let name = String::from_utf16_lossy(&units);
    name.split(';').next().unwrap_or_default().to_string()
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
