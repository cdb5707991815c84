// Runtime settings, search path handling, trusted download helpers and process primitives.
use super::*;
#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

pub const TRANSCODER_PROGRAM: &str = "ffmpeg";
pub const TRANSCODER_SIGNATURE: &str = "ffmpeg version";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_VAR: &str = "CFSTREAM_DL_CONFIG";
pub const DEFAULT_INSTALL_DIR: &str = "ffmpeg";
pub const DEFAULT_OUTPUT_NAME: &str = "downloaded_video";
pub(super) const FFMPEG_WINDOWS_ARCHIVE_URL: &str =
    "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-win64-gpl.zip";
pub(super) const FFMPEG_WINDOWS_SHA256_URL: &str =
    "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/checksums.sha256";
pub(super) const TRUSTED_DOWNLOAD_HOSTS: [&str; 2] = ["github.com", "objects.githubusercontent.com"];
pub(super) const MIN_ARCHIVE_BYTES: u64 = 1024 * 256;
#[cfg(target_os = "windows")]
pub(super) const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub(super) fn hidden_command(program: impl AsRef<OsStr>) -> Command {
    let mut command = Command::new(program);
    #[cfg(target_os = "windows")]
    {
        command.creation_flags(CREATE_NO_WINDOW);
    }
    command
}

fn default_output_name() -> String {
    DEFAULT_OUTPUT_NAME.to_string()
}

fn default_auto_install() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    #[serde(default)]
    pub ffmpeg_custom_path: Option<String>,
    #[serde(default)]
    pub install_dir: Option<String>,
    #[serde(default = "default_output_name")]
    pub default_output_name: String,
    #[serde(default = "default_auto_install")]
    pub auto_install: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            ffmpeg_custom_path: None,
            install_dir: None,
            default_output_name: default_output_name(),
            auto_install: true,
        }
    }
}

impl RuntimeSettings {
    pub fn install_dir(&self) -> PathBuf {
        PathBuf::from(
            self.install_dir
                .as_deref()
                .unwrap_or(DEFAULT_INSTALL_DIR),
        )
    }
}

pub fn settings_file_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(SETTINGS_ENV_VAR) {
        if !explicit.is_empty() {
            return Some(PathBuf::from(explicit));
        }
    }
    dirs::config_dir().map(|dir| dir.join("cfstream-dl").join(SETTINGS_FILE_NAME))
}

fn clean_optional_path(value: Option<String>) -> Result<Option<String>, String> {
    let Some(path) = value
        .map(|raw| raw.trim().to_string())
        .filter(|path| !path.is_empty())
    else {
        return Ok(None);
    };
    if path.chars().any(char::is_control) {
        return Err(format!("Path {path:?} contains control characters."));
    }
    Ok(Some(path))
}

pub fn normalize_settings(mut settings: RuntimeSettings) -> Result<RuntimeSettings, String> {
    settings.ffmpeg_custom_path = clean_optional_path(settings.ffmpeg_custom_path)?;
    settings.install_dir = clean_optional_path(settings.install_dir)?;
    settings.default_output_name = settings.default_output_name.trim().to_string();
    if settings.default_output_name.is_empty() {
        settings.default_output_name = default_output_name();
    }
    Ok(settings)
}

pub fn load_settings(path: &Path) -> Result<RuntimeSettings, String> {
    if !path.exists() {
        return Ok(RuntimeSettings::default());
    }

    let raw =
        fs::read_to_string(path).map_err(|error| format!("Failed to read settings: {error}"))?;
    let parsed: RuntimeSettings =
        serde_json::from_str(&raw).map_err(|error| format!("Failed to parse settings: {error}"))?;
    normalize_settings(parsed)
}

// Prepended directories come before the inherited PATH; the process environment is never touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    prepended: Vec<PathBuf>,
    inherited: Option<OsString>,
}

impl SearchPath {
    pub fn from_env() -> Self {
        Self {
            prepended: Vec::new(),
            inherited: std::env::var_os("PATH"),
        }
    }

    pub fn with_inherited(inherited: Option<OsString>) -> Self {
        Self {
            prepended: Vec::new(),
            inherited,
        }
    }

    pub fn prepend(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        self.prepended.retain(|existing| existing != &dir);
        self.prepended.insert(0, dir);
    }

    pub fn prepended(&self) -> &[PathBuf] {
        &self.prepended
    }

    pub fn dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.prepended.clone();
        if let Some(inherited) = self.inherited.as_ref() {
            dirs.extend(std::env::split_paths(inherited));
        }
        dirs
    }

    pub fn joined(&self) -> Option<OsString> {
        match std::env::join_paths(self.dirs()) {
            Ok(joined) => Some(joined),
            Err(error) => {
                log::warn!("Search path cannot be joined, falling back to inherited PATH: {error}");
                self.inherited.clone()
            }
        }
    }

    pub fn resolve(&self, program: impl AsRef<OsStr>) -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        which::which_in(program, self.joined(), cwd).ok()
    }

    pub(super) fn command(&self, program: impl AsRef<OsStr>) -> Command {
        let program = program.as_ref();
        let resolved = self
            .resolve(program)
            .unwrap_or_else(|| PathBuf::from(program));
        let mut command = hidden_command(resolved);
        if let Some(path) = self.joined() {
            command.env("PATH", path);
        }
        command
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    Linux,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStrategy {
    LocalSearch,
    ArchiveInstall,
    PackageManagerInstall,
    ManualOnly,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Other
        }
    }

    pub fn strategies(self) -> &'static [InstallStrategy] {
        match self {
            Self::Windows => &[InstallStrategy::LocalSearch, InstallStrategy::ArchiveInstall],
            Self::Linux => &[InstallStrategy::PackageManagerInstall],
            Self::Other => &[InstallStrategy::ManualOnly],
        }
    }

    pub fn executable_name(self, name: &str) -> String {
        match self {
            Self::Windows => format!("{name}.exe"),
            Self::Linux | Self::Other => name.to_string(),
        }
    }

    pub fn local_candidates(self, install_dir: &Path) -> Vec<PathBuf> {
        if !self.strategies().contains(&InstallStrategy::LocalSearch) {
            return Vec::new();
        }
        let executable = self.executable_name(TRANSCODER_PROGRAM);
        vec![
            install_dir.join("bin").join(&executable),
            install_dir
                .join("ffmpeg-master-latest-win64-gpl")
                .join("bin")
                .join(&executable),
            install_dir.join(&executable),
        ]
    }
}

pub(super) fn trusted_download_url(url: &str) -> Result<Url, String> {
    let parsed = Url::parse(url).map_err(|error| format!("Invalid download URL {url}: {error}"))?;
    let trusted = parsed.scheme() == "https"
        && parsed.username().is_empty()
        && parsed.password().is_none()
        && parsed.port().is_none()
        && parsed
            .host_str()
            .is_some_and(|host| TRUSTED_DOWNLOAD_HOSTS.iter().any(|trusted| *trusted == host));
    if !trusted {
        return Err(format!("Refusing to download from untrusted source {url}"));
    }
    Ok(parsed)
}

// Lines look like `<sha256>  <file>` or `<sha256> *<file>`.
pub(super) fn checksum_for_asset(manifest: &str, asset_name: &str) -> Option<String> {
    manifest.lines().find_map(|line| {
        let (hash, name) = line.trim().split_once(char::is_whitespace)?;
        let name = name.trim_start().trim_start_matches('*');
        let valid = hash.len() == 64 && hash.chars().all(|ch| ch.is_ascii_hexdigit());
        (valid && name == asset_name).then(|| hash.to_ascii_lowercase())
    })
}

pub(super) fn file_sha256(path: &Path) -> Result<String, String> {
    use sha2::{Digest, Sha256};

    let mut file =
        fs::File::open(path).map_err(|error| format!("Failed to open {}: {error}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|error| format!("Failed to hash {}: {error}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub(super) fn check_archive_sha256(path: &Path, expected: &str) -> Result<(), String> {
    let actual = file_sha256(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(format!("Checksum mismatch: expected {expected}, got {actual}."));
    }
    Ok(())
}

// Streams the archive body to disk; a partial or undersized file is removed.
pub(super) fn write_archive<R: Read>(
    reader: &mut R,
    destination: &Path,
    total_size: Option<u64>,
) -> Result<u64, String> {
    let written = copy_with_progress(reader, destination, total_size).and_then(|written| {
        if written < MIN_ARCHIVE_BYTES {
            return Err(format!(
                "Downloaded archive is only {written} bytes and is probably corrupted."
            ));
        }
        Ok(written)
    });
    if written.is_err() {
        let _ = fs::remove_file(destination);
    }
    written
}

fn copy_with_progress<R: Read>(
    reader: &mut R,
    destination: &Path,
    total_size: Option<u64>,
) -> Result<u64, String> {
    let mut file = fs::File::create(destination)
        .map_err(|error| format!("Failed to create archive file: {error}"))?;

    let mut downloaded = 0_u64;
    let mut last_logged_percent = None;
    let mut last_log_instant = Instant::now();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|error| format!("Failed to read downloaded stream: {error}"))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .map_err(|error| format!("Failed to write downloaded file: {error}"))?;
        downloaded += read as u64;

        let megabytes = downloaded as f64 / (1024.0 * 1024.0);
        match total_size.filter(|total| *total > 0) {
            Some(total) => {
                let percent = (downloaded * 100 / total).min(100);
                if last_logged_percent != Some(percent)
                    && (last_log_instant.elapsed().as_millis() > 500 || percent == 100)
                {
                    last_logged_percent = Some(percent);
                    last_log_instant = Instant::now();
                    log::info!("Downloading FFmpeg: {percent}% ({megabytes:.1} MB)");
                }
            }
            None => {
                if last_log_instant.elapsed().as_millis() > 1000 {
                    last_log_instant = Instant::now();
                    log::info!("Downloading FFmpeg: {megabytes:.1} MB received");
                }
            }
        }
    }
    Ok(downloaded)
}

pub trait ArchiveFetcher {
    fn fetch_text(&self, url: &str) -> Result<String, String>;

    // Returns the number of bytes written to `destination`.
    fn fetch_to_path(&self, url: &str, destination: &Path) -> Result<u64, String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UreqFetcher;

impl ArchiveFetcher for UreqFetcher {
    fn fetch_text(&self, url: &str) -> Result<String, String> {
        let parsed = trusted_download_url(url)?;
        ureq::get(parsed.as_str())
            .call()
            .map_err(|error| format!("Failed to fetch checksum: {error}"))?
            .into_string()
            .map_err(|error| format!("Failed to read checksum: {error}"))
    }

    fn fetch_to_path(&self, url: &str, destination: &Path) -> Result<u64, String> {
        let parsed = trusted_download_url(url)?;
        log::info!("Connecting to {}", parsed.host_str().unwrap_or("unknown source"));

        let response = ureq::get(parsed.as_str())
            .call()
            .map_err(|error| format!("Failed to download archive: {error}"))?;
        let total_size = response
            .header("content-length")
            .and_then(|value| value.parse::<u64>().ok());
        write_archive(&mut response.into_reader(), destination, total_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_when_file_is_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&temp.path().join("missing.json")).expect("defaults");
        assert_eq!(settings, RuntimeSettings::default());
        assert_eq!(settings.install_dir(), PathBuf::from("ffmpeg"));
        assert!(settings.auto_install);
    }

    #[test]
    fn settings_are_normalized_after_loading() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");
        fs::write(
            &path,
            r#"{"ffmpegCustomPath": "   ", "installDir": " tools/ffmpeg ", "defaultOutputName": "  ", "autoInstall": false}"#,
        )
        .expect("write settings");

        let settings = load_settings(&path).expect("settings");
        assert_eq!(settings.ffmpeg_custom_path, None);
        assert_eq!(settings.install_dir.as_deref(), Some("tools/ffmpeg"));
        assert_eq!(settings.default_output_name, DEFAULT_OUTPUT_NAME);
        assert!(!settings.auto_install);
    }

    #[test]
    fn settings_reject_control_characters() {
        let settings = RuntimeSettings {
            install_dir: Some("ffm\u{7}peg".to_string()),
            ..RuntimeSettings::default()
        };
        assert!(normalize_settings(settings).is_err());
    }

    #[test]
    fn malformed_settings_are_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");
        fs::write(&path, "{ not json").expect("write settings");
        let error = load_settings(&path).expect_err("parse error");
        assert!(error.starts_with("Failed to parse settings"));
    }

    #[test]
    fn search_path_prepends_without_duplicates() {
        let mut search_path = SearchPath::with_inherited(None);
        search_path.prepend("/opt/a");
        search_path.prepend("/opt/b");
        search_path.prepend("/opt/a");
        assert_eq!(
            search_path.prepended(),
            &[PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]
        );
    }

    #[test]
    fn search_path_keeps_inherited_entries_last() {
        let inherited = std::env::join_paths([PathBuf::from("/usr/bin")]).expect("join");
        let mut search_path = SearchPath::with_inherited(Some(inherited));
        search_path.prepend("/opt/ffmpeg/bin");
        assert_eq!(
            search_path.dirs(),
            vec![PathBuf::from("/opt/ffmpeg/bin"), PathBuf::from("/usr/bin")]
        );
    }

    #[test]
    fn search_path_resolves_programs_in_prepended_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let name = HostPlatform::current().executable_name("cfstream-fake-tool");
        let program = temp.path().join(&name);
        fs::write(&program, "").expect("write program");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).expect("chmod");
        }

        let mut search_path = SearchPath::with_inherited(None);
        assert!(search_path.resolve("cfstream-fake-tool").is_none());
        search_path.prepend(temp.path());
        let resolved = search_path.resolve("cfstream-fake-tool").expect("resolved");
        assert_eq!(
            resolved.canonicalize().expect("canonical"),
            program.canonicalize().expect("canonical")
        );
    }

    #[test]
    fn platform_strategies_are_fixed_per_family() {
        assert_eq!(
            HostPlatform::Windows.strategies(),
            &[InstallStrategy::LocalSearch, InstallStrategy::ArchiveInstall]
        );
        assert_eq!(
            HostPlatform::Linux.strategies(),
            &[InstallStrategy::PackageManagerInstall]
        );
        assert_eq!(HostPlatform::Other.strategies(), &[InstallStrategy::ManualOnly]);
    }

    #[test]
    fn local_candidates_only_exist_for_windows() {
        let root = Path::new("ffmpeg");
        assert!(HostPlatform::Linux.local_candidates(root).is_empty());
        assert!(HostPlatform::Other.local_candidates(root).is_empty());
        let candidates = HostPlatform::Windows.local_candidates(root);
        assert_eq!(
            candidates,
            vec![
                root.join("bin").join("ffmpeg.exe"),
                root.join("ffmpeg-master-latest-win64-gpl")
                    .join("bin")
                    .join("ffmpeg.exe"),
                root.join("ffmpeg.exe"),
            ]
        );
    }

    #[test]
    fn only_trusted_https_sources_are_accepted() {
        assert!(trusted_download_url(FFMPEG_WINDOWS_ARCHIVE_URL).is_ok());
        assert!(trusted_download_url(FFMPEG_WINDOWS_SHA256_URL).is_ok());
        assert!(trusted_download_url("http://github.com/file.zip").is_err());
        assert!(trusted_download_url("https://user:pw@github.com/file.zip").is_err());
        assert!(trusted_download_url("https://github.com:8443/file.zip").is_err());
        assert!(trusted_download_url("https://evil.example/file.zip").is_err());
        assert!(trusted_download_url("https://github.com.evil.example/file.zip").is_err());
    }

    #[test]
    fn checksum_manifest_lookup_matches_asset_name() {
        let hash = "a".repeat(64);
        let manifest = format!(
            "# generated\n{}  ffmpeg-n7.1-win64-gpl.zip\n{hash} *ffmpeg-master-latest-win64-gpl.zip\n",
            "b".repeat(64)
        );
        assert_eq!(
            checksum_for_asset(&manifest, "ffmpeg-master-latest-win64-gpl.zip"),
            Some(hash)
        );
        assert_eq!(checksum_for_asset(&manifest, "missing.zip"), None);
        assert_eq!(checksum_for_asset("xyz  missing.zip", "missing.zip"), None);
    }

    #[test]
    fn checksum_verification_detects_mismatch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("payload.bin");
        fs::write(&path, b"payload").expect("write payload");
        let actual = file_sha256(&path).expect("hash");
        assert!(check_archive_sha256(&path, &actual).is_ok());
        assert!(check_archive_sha256(&path, &actual.to_ascii_uppercase()).is_ok());
        assert!(check_archive_sha256(&path, &"0".repeat(64)).is_err());
    }

    #[test]
    fn undersized_archive_is_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let destination = temp.path().join("ffmpeg.zip");
        let mut body = std::io::Cursor::new(vec![0_u8; 1024]);
        let error = write_archive(&mut body, &destination, Some(1024)).expect_err("too small");
        assert!(error.contains("1024 bytes"));
        assert!(!destination.exists());
    }

    #[test]
    fn full_archive_is_kept() {
        let temp = tempfile::tempdir().expect("tempdir");
        let destination = temp.path().join("ffmpeg.zip");
        let size = MIN_ARCHIVE_BYTES as usize + 10;
        let mut body = std::io::Cursor::new(vec![7_u8; size]);
        let written = write_archive(&mut body, &destination, None).expect("written");
        assert_eq!(written, size as u64);
        assert_eq!(fs::metadata(&destination).expect("metadata").len(), size as u64);
    }
}
