// Locating FFmpeg and provisioning it when the host does not have it.
use super::*;

pub const ARCHIVE_FILE_NAME: &str = "ffmpeg.zip";

pub trait TranscoderProbe {
    fn probe(&self, search_path: &SearchPath) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl TranscoderProbe for SystemProbe {
    fn probe(&self, search_path: &SearchPath) -> bool {
        let Some(binary) = search_path.resolve(TRANSCODER_PROGRAM) else {
            log::debug!("{TRANSCODER_PROGRAM} was not found on the search path");
            return false;
        };
        let mut command = hidden_command(&binary);
        if let Some(path) = search_path.joined() {
            command.env("PATH", path);
        }
        let output = match command
            .arg("-version")
            .stdin(Stdio::null())
            .output()
        {
            Ok(output) => output,
            Err(error) => {
                log::debug!("Failed to run {}: {error}", binary.display());
                return false;
            }
        };
        String::from_utf8_lossy(&output.stdout).contains(TRANSCODER_SIGNATURE)
            || String::from_utf8_lossy(&output.stderr).contains(TRANSCODER_SIGNATURE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinuxDistro {
    Debian,
    CentOs,
    Fedora,
    Arch,
}

impl LinuxDistro {
    pub fn detect(system_root: &Path) -> Option<Self> {
        let etc = system_root.join("etc");
        if etc.join("debian_version").exists() {
            return Some(Self::Debian);
        }
        let redhat_release = etc.join("redhat-release");
        if redhat_release.exists() {
            let release = fs::read_to_string(&redhat_release).unwrap_or_default();
            if release.to_ascii_lowercase().contains("centos") {
                return Some(Self::CentOs);
            }
            return Some(Self::Fedora);
        }
        if etc.join("arch-release").exists() {
            return Some(Self::Arch);
        }
        None
    }

    pub fn install_commands(self) -> Vec<Vec<&'static str>> {
        match self {
            Self::Debian => vec![
                vec!["sudo", "apt", "update"],
                vec!["sudo", "apt", "install", "-y", "ffmpeg"],
            ],
            Self::CentOs => vec![vec!["sudo", "yum", "install", "-y", "ffmpeg"]],
            Self::Fedora => vec![vec!["sudo", "dnf", "install", "-y", "ffmpeg"]],
            Self::Arch => vec![vec!["sudo", "pacman", "-Sy", "--noconfirm", "ffmpeg"]],
        }
    }
}

pub(super) fn linux_manual_instructions() -> Vec<String> {
    vec![
        "Debian/Ubuntu: sudo apt install ffmpeg".to_string(),
        "RHEL/CentOS: sudo yum install ffmpeg".to_string(),
        "Fedora: sudo dnf install ffmpeg".to_string(),
        "Arch: sudo pacman -S ffmpeg".to_string(),
    ]
}

pub(super) fn generic_manual_instructions() -> Vec<String> {
    vec![
        "macOS: brew install ffmpeg".to_string(),
        "Other systems: see https://ffmpeg.org/download.html".to_string(),
    ]
}

pub(super) fn list_install_dir(install_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(install_dir) else {
        return Vec::new();
    };
    let mut listing: Vec<String> = entries
        .flatten()
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.path().is_dir() {
                format!("{name} (dir)")
            } else {
                name
            }
        })
        .collect();
    listing.sort();
    listing
}

pub(super) fn extract_archive(archive_path: &Path, install_dir: &Path) -> Result<(), String> {
    let file = fs::File::open(archive_path)
        .map_err(|error| format!("Failed to open ffmpeg archive: {error}"))?;
    let mut archive =
        ZipArchive::new(file).map_err(|error| format!("Failed to read ffmpeg archive: {error}"))?;
    archive
        .extract(install_dir)
        .map_err(|error| format!("Failed to extract ffmpeg archive: {error}"))
}

// The archive's top folder name changes between builds.
pub(super) fn find_extracted_binary(root: &Path, executable: &str) -> Option<PathBuf> {
    let matches: Vec<PathBuf> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().eq_ignore_ascii_case(executable))
        .map(|entry| entry.into_path())
        .collect();
    let in_bin_dir = matches.iter().find(|candidate| {
        candidate
            .parent()
            .and_then(|parent| parent.file_name())
            .map(|name| name.eq_ignore_ascii_case("bin"))
            .unwrap_or(false)
    });
    in_bin_dir.or_else(|| matches.first()).cloned()
}

pub struct BinaryLocator<P = SystemProbe, F = UreqFetcher> {
    platform: HostPlatform,
    install_dir: PathBuf,
    custom_binary: Option<PathBuf>,
    transcoder: Option<PathBuf>,
    auto_install: bool,
    system_root: PathBuf,
    search_path: SearchPath,
    probe: P,
    fetcher: F,
}

impl BinaryLocator {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::new(
            HostPlatform::current(),
            settings.install_dir(),
            SearchPath::from_env(),
            SystemProbe,
            UreqFetcher,
        )
        .with_custom_binary(settings.ffmpeg_custom_path.as_ref().map(PathBuf::from))
        .with_auto_install(settings.auto_install)
    }
}

impl<P: TranscoderProbe, F: ArchiveFetcher> BinaryLocator<P, F> {
    pub fn new(
        platform: HostPlatform,
        install_dir: PathBuf,
        search_path: SearchPath,
        probe: P,
        fetcher: F,
    ) -> Self {
        Self {
            platform,
            install_dir,
            custom_binary: None,
            transcoder: None,
            auto_install: true,
            system_root: PathBuf::from("/"),
            search_path,
            probe,
            fetcher,
        }
    }

    pub fn with_custom_binary(mut self, path: Option<PathBuf>) -> Self {
        self.custom_binary = path;
        self
    }

    pub fn with_auto_install(mut self, enabled: bool) -> Self {
        self.auto_install = enabled;
        self
    }

    pub fn with_system_root(mut self, root: PathBuf) -> Self {
        self.system_root = root;
        self
    }

    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    // Falls back to the bare program name when FFmpeg was found on the search path.
    pub fn transcoder(&self) -> PathBuf {
        self.transcoder
            .clone()
            .unwrap_or_else(|| PathBuf::from(TRANSCODER_PROGRAM))
    }

    pub fn download_supervisor(&self) -> DownloadSupervisor {
        DownloadSupervisor::with_program(self.transcoder(), self.search_path.clone())
    }

    pub fn ensure_available(&mut self) -> Result<(), ToolingError> {
        if self.probe.probe(&self.search_path) {
            log::debug!("FFmpeg already available");
            return Ok(());
        }

        if let Some(binary) = self.find_local_install() {
            log::info!("Using existing FFmpeg install at {}", binary.display());
            self.use_binary(binary);
            return Ok(());
        }

        if !self.auto_install {
            return Err(ToolingError::BinaryUnavailable {
                reason: "automatic installation is disabled".to_string(),
                instructions: self.manual_instructions(),
            });
        }

        for strategy in self.platform.strategies() {
            match strategy {
                InstallStrategy::LocalSearch => continue,
                InstallStrategy::ArchiveInstall => self.install_from_archive()?,
                InstallStrategy::PackageManagerInstall => self.install_with_package_manager()?,
                InstallStrategy::ManualOnly => {
                    return Err(ToolingError::BinaryUnavailable {
                        reason: "automatic installation is not supported on this platform"
                            .to_string(),
                        instructions: generic_manual_instructions(),
                    });
                }
            }
        }

        if self.probe.probe(&self.search_path) {
            return Ok(());
        }
        Err(ToolingError::BinaryUnavailable {
            reason: "installation finished but FFmpeg still does not run".to_string(),
            instructions: self.manual_instructions(),
        })
    }

    fn manual_instructions(&self) -> Vec<String> {
        match self.platform {
            HostPlatform::Linux => linux_manual_instructions(),
            HostPlatform::Windows | HostPlatform::Other => generic_manual_instructions(),
        }
    }

    fn find_local_install(&self) -> Option<PathBuf> {
        let custom = self
            .custom_binary
            .iter()
            .filter(|path| path.is_file())
            .cloned();
        custom
            .chain(self.platform.local_candidates(&self.install_dir))
            .inspect(|candidate| log::debug!("Checking {}", candidate.display()))
            .find(|candidate| candidate.is_file())
    }

    fn use_binary(&mut self, binary: PathBuf) {
        if let Some(dir) = binary.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            self.search_path.prepend(dir);
        }
        self.transcoder = Some(binary);
    }

    fn install_from_archive(&mut self) -> Result<(), ToolingError> {
        let install_dir = self.install_dir.clone();
        self.download_and_extract(&install_dir)
            .map_err(|error| error.with_listing(list_install_dir(&install_dir)))
    }

    fn download_and_extract(&mut self, install_dir: &Path) -> Result<(), ToolingError> {
        fs::create_dir_all(install_dir)
            .map_err(|error| ToolingError::provisioning(ProvisionStage::Download, error.to_string()))?;

        let asset_name = FFMPEG_WINDOWS_ARCHIVE_URL
            .rsplit('/')
            .next()
            .unwrap_or(ARCHIVE_FILE_NAME);
        log::info!("Fetching checksum for {asset_name}");
        let manifest = self
            .fetcher
            .fetch_text(FFMPEG_WINDOWS_SHA256_URL)
            .map_err(|error| ToolingError::provisioning(ProvisionStage::Verification, error))?;
        let expected_sha256 = checksum_for_asset(&manifest, asset_name).ok_or_else(|| {
            ToolingError::provisioning(
                ProvisionStage::Verification,
                format!("Failed to find SHA256 for {asset_name}."),
            )
        })?;

        let archive_path = install_dir.join(ARCHIVE_FILE_NAME);
        log::info!("Downloading {FFMPEG_WINDOWS_ARCHIVE_URL}");
        let written = self
            .fetcher
            .fetch_to_path(FFMPEG_WINDOWS_ARCHIVE_URL, &archive_path)
            .map_err(|error| ToolingError::provisioning(ProvisionStage::Download, error))?;
        log::debug!("Archive downloaded ({written} bytes)");

        if let Err(error) = check_archive_sha256(&archive_path, &expected_sha256) {
            let _ = fs::remove_file(&archive_path);
            return Err(ToolingError::provisioning(ProvisionStage::Verification, error));
        }

        log::info!("Extracting FFmpeg into {}", install_dir.display());
        extract_archive(&archive_path, install_dir)
            .map_err(|error| ToolingError::provisioning(ProvisionStage::Extraction, error))?;
        let _ = fs::remove_file(&archive_path);

        let executable = self.platform.executable_name(TRANSCODER_PROGRAM);
        let binary = find_extracted_binary(install_dir, &executable).ok_or_else(|| {
            ToolingError::provisioning(
                ProvisionStage::MissingBinary,
                format!("{executable} was not found in the extracted archive."),
            )
        })?;
        log::info!("FFmpeg installed to {}", binary.display());
        self.use_binary(binary);
        Ok(())
    }

    fn install_with_package_manager(&mut self) -> Result<(), ToolingError> {
        let Some(distro) = LinuxDistro::detect(&self.system_root) else {
            return Err(ToolingError::BinaryUnavailable {
                reason: "the Linux distribution could not be identified".to_string(),
                instructions: linux_manual_instructions(),
            });
        };
        log::info!("Installing FFmpeg with the {distro:?} package manager");

        for argv in distro.install_commands() {
            let Some((program, args)) = argv.split_first() else {
                continue;
            };
            let display = argv.join(" ");
            let status = self
                .search_path
                .command(program)
                .args(args)
                .status()
                .map_err(|error| {
                    ToolingError::provisioning(
                        ProvisionStage::PackageManager,
                        format!("Failed to run `{display}`: {error}"),
                    )
                })?;
            if !status.success() {
                return Err(ToolingError::provisioning(
                    ProvisionStage::PackageManager,
                    format!("`{display}` exited with {}", exit_code_label(&status.code())),
                ));
            }
        }
        Ok(())
    }
}
