//! Decoder gateway backed by external command-line tools
//!
//! Each call runs `<interpreter> <script> ...` and bounds it with a timeout.
//! Calls block the current thread on the runtime handle, so they must be
//! made from blocking worker threads, never from inside async tasks.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::{DecoderGateway, InstallerInfo, Recognition, ResourceInfo};
use crate::error::DecodeError;
use crate::model::Icon;
use crate::store::hash_bytes;

const UNSUPPORTED_INSTALLER_MESSAGE: &str = "Only ER5 SIS files are supported";
const NOT_A_RESOURCE_MESSAGE: &str = "Not an AIF file";
const ILLEGAL_BYTE_SEQUENCE_MESSAGE: &str = "Illegal byte sequence";

const INSTALLER_TOOL: &str = "dumpsis.lua";
const RESOURCE_TOOL: &str = "dumpaif.lua";
const RECOGNIZE_TOOL: &str = "recognize.lua";

static ICON_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^_(\d+)_(\d+)x(\d+)_(\d+)bpp\.bmp$").expect("valid icon pattern"));

#[derive(Debug, Clone)]
pub struct ProcessGateway {
    interpreter: String,
    tools_directory: PathBuf,
    timeout: Duration,
    handle: Handle,
}

impl ProcessGateway {
    pub fn new(
        interpreter: impl Into<String>,
        tools_directory: impl Into<PathBuf>,
        timeout: Duration,
        handle: Handle,
    ) -> Self {
        Self {
            interpreter: interpreter.into(),
            tools_directory: tools_directory.into(),
            timeout,
            handle,
        }
    }

    fn run<I, S>(&self, tool: &str, args: I) -> Result<Output, DecodeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let script = self.tools_directory.join(tool);
        let mut command = Command::new(&self.interpreter);
        command
            .arg(&script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(tool, "Running decoder");
        let timeout = self.timeout;
        self.handle.block_on(async move {
            match tokio::time::timeout(timeout, command.output()).await {
                Ok(output) => output.map_err(DecodeError::from),
                Err(_) => Err(DecodeError::Timeout(timeout)),
            }
        })
    }

    fn run_json<T: serde::de::DeserializeOwned>(&self, tool: &str, path: &Path) -> Result<T, DecodeError> {
        let output = self.run(tool, [OsStr::new("--json"), path.as_os_str()])?;
        check(&output)?;
        serde_json::from_slice(&output.stdout)
            .map_err(|e| DecodeError::corrupt(format!("unreadable decoder output: {e}")))
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

fn check(output: &Output) -> Result<(), DecodeError> {
    let text = combined_output(output);
    if text.contains(UNSUPPORTED_INSTALLER_MESSAGE) || text.contains(NOT_A_RESOURCE_MESSAGE) {
        return Err(DecodeError::unsupported(text.trim()));
    }
    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        return Err(DecodeError::corrupt(format!(
            "decoder exited with code {code}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

impl DecoderGateway for ProcessGateway {
    fn decode_installer(&self, path: &Path) -> Result<InstallerInfo, DecodeError> {
        self.run_json(INSTALLER_TOOL, path)
    }

    fn decode_metadata_resource(&self, path: &Path) -> Result<ResourceInfo, DecodeError> {
        self.run_json(RESOURCE_TOOL, path)
    }

    fn extract_icons(&self, path: &Path, scratch: &Path) -> Result<Vec<Icon>, DecodeError> {
        let basename = path
            .file_name()
            .ok_or_else(|| DecodeError::corrupt("resource path has no file name"))?
            .to_string_lossy()
            .into_owned();

        // The tool writes bitmaps next to its input, so work on a private copy.
        let scratch = tempfile::Builder::new().prefix("relic-icons-").tempdir_in(scratch)?;
        let copy = scratch.path().join(&basename);
        std::fs::copy(path, &copy)?;

        let output = self.run(RESOURCE_TOOL, [OsStr::new("-e"), copy.as_os_str()])?;
        check(&output)?;

        let mut found = Vec::new();
        for entry in std::fs::read_dir(scratch.path())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(suffix) = name.strip_prefix(basename.as_str()) else {
                continue;
            };
            let Some(captures) = ICON_SUFFIX.captures(suffix) else {
                continue;
            };
            let number = |i: usize| captures[i].parse::<u32>().unwrap_or_default();
            let bytes = std::fs::read(entry.path())?;
            found.push((
                number(1),
                Icon {
                    width: number(2),
                    height: number(3),
                    bit_depth: number(4),
                    content_hash: hash_bytes(&bytes),
                    bytes,
                },
            ));
        }
        found.sort_by_key(|(index, _)| *index);
        Ok(found.into_iter().map(|(_, icon)| icon).collect())
    }

    fn extract_installer_payload(&self, path: &Path, destination: &Path) -> Result<(), DecodeError> {
        let output = self.run(INSTALLER_TOOL, [path.as_os_str(), destination.as_os_str()])?;
        if combined_output(&output).contains(ILLEGAL_BYTE_SEQUENCE_MESSAGE) {
            warn!(path = %path.display(), "Installer payload uses unsupported file name encoding");
            return Ok(());
        }
        check(&output)
    }

    fn recognize(&self, path: &Path) -> Result<Recognition, DecodeError> {
        self.run_json(RECOGNIZE_TOOL, path)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn gateway(tools: &Path, runtime: &tokio::runtime::Runtime, timeout: Duration) -> ProcessGateway {
        ProcessGateway::new("sh", tools, timeout, runtime.handle().clone())
    }

    fn write_tool(tools: &Path, name: &str, body: &str) {
        std::fs::write(tools.join(name), body).unwrap();
    }

    #[test]
    fn test_decode_installer_parses_json() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tools = TempDir::new().unwrap();
        write_tool(
            tools.path(),
            INSTALLER_TOOL,
            r#"echo '{"uid": 268435457, "name": {"en_GB": "Chess"}, "version": "1.00"}'"#,
        );

        let info = gateway(tools.path(), &runtime, Duration::from_secs(10))
            .decode_installer(Path::new("chess.sis"))
            .unwrap();
        assert_eq!(info.uid, 0x10000001);
        assert_eq!(info.name["en_GB"], "Chess");
    }

    #[test]
    fn test_unsupported_message_is_classified() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tools = TempDir::new().unwrap();
        write_tool(
            tools.path(),
            INSTALLER_TOOL,
            "echo 'Only ER5 SIS files are supported' >&2; exit 1",
        );

        let result = gateway(tools.path(), &runtime, Duration::from_secs(10))
            .decode_installer(Path::new("old.sis"));
        assert!(matches!(result, Err(DecodeError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_failed_exit_is_corrupt() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tools = TempDir::new().unwrap();
        write_tool(tools.path(), RESOURCE_TOOL, "echo boom >&2; exit 3");

        let result = gateway(tools.path(), &runtime, Duration::from_secs(10))
            .decode_metadata_resource(Path::new("x.aif"));
        match result {
            Err(DecodeError::CorruptFile { message }) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_hang_becomes_timeout() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tools = TempDir::new().unwrap();
        write_tool(tools.path(), RECOGNIZE_TOOL, "sleep 30");

        let result = gateway(tools.path(), &runtime, Duration::from_millis(200))
            .recognize(Path::new("x.opo"));
        assert!(matches!(result, Err(DecodeError::Timeout(_))));
    }

    #[test]
    fn test_extract_icons_reads_bitmaps_in_index_order() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tools = TempDir::new().unwrap();
        // $1 is "-e", $2 the copied resource.
        write_tool(
            tools.path(),
            RESOURCE_TOOL,
            r#"printf a > "$2_1_48x48_8bpp.bmp"; printf b > "$2_0_24x24_2bpp.bmp"; printf c > "$2.txt""#,
        );
        let input = TempDir::new().unwrap();
        let aif = input.path().join("Game.aif");
        std::fs::write(&aif, b"aif").unwrap();

        let work = TempDir::new().unwrap();

        let icons = gateway(tools.path(), &runtime, Duration::from_secs(10))
            .extract_icons(&aif, work.path())
            .unwrap();

        let sizes: Vec<_> = icons.iter().map(|i| (i.width, i.height, i.bit_depth)).collect();
        assert_eq!(sizes, vec![(24, 24, 2), (48, 48, 8)]);
        assert_eq!(icons[1].bytes, b"a");
        assert_eq!(icons[1].content_hash, hash_bytes(b"a"));
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_extract_icons_works_below_the_given_scratch() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tools = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let seen = work.path().join("seen.txt");
        write_tool(
            tools.path(),
            RESOURCE_TOOL,
            &format!(r#"dirname "$2" > "{}""#, seen.display()),
        );
        let input = TempDir::new().unwrap();
        let aif = input.path().join("Game.aif");
        std::fs::write(&aif, b"aif").unwrap();

        let icons = gateway(tools.path(), &runtime, Duration::from_secs(10))
            .extract_icons(&aif, work.path())
            .unwrap();

        assert!(icons.is_empty());
        let used = std::fs::read_to_string(&seen).unwrap();
        assert!(Path::new(used.trim()).starts_with(work.path()), "{used}");
    }
}
