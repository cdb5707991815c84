// Supervising the FFmpeg remux process and reading its combined output.
use super::*;

pub const OUTPUT_EXTENSION: &str = ".mp4";
pub const PROGRESS_TIME_TOKEN: &str = "time=";
pub const PROGRESS_SPEED_TOKEN: &str = "speed=";
pub const REMEDIATION_HINTS: [&str; 3] = [
    "Check that the URL is correct and reachable",
    "Try a different network connection",
    "Make sure there is enough free disk space",
];

pub fn normalize_output_name(name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(OUTPUT_EXTENSION) {
        name.to_string()
    } else {
        format!("{name}{OUTPUT_EXTENSION}")
    }
}

pub fn is_progress_line(line: &str) -> bool {
    line.contains(PROGRESS_TIME_TOKEN) && line.contains(PROGRESS_SPEED_TOKEN)
}

// FFmpeg redraws its status line with bare carriage returns, so `\r` ends a line too.
pub(super) fn read_lossy_process_line<R: BufRead>(
    reader: &mut R,
    raw_buffer: &mut Vec<u8>,
) -> Result<Option<String>, std::io::Error> {
    raw_buffer.clear();
    loop {
        let (consumed, finished) = {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                if raw_buffer.is_empty() {
                    return Ok(None);
                }
                break;
            }
            match available.iter().position(|byte| matches!(byte, b'\n' | b'\r')) {
                Some(index) => {
                    raw_buffer.extend_from_slice(&available[..index]);
                    (index + 1, true)
                }
                None => {
                    raw_buffer.extend_from_slice(available);
                    (available.len(), false)
                }
            }
        };
        reader.consume(consumed);
        if finished {
            break;
        }
    }
    Ok(Some(String::from_utf8_lossy(raw_buffer).to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub manifest_url: StreamUrl,
    pub output_path: PathBuf,
}

impl DownloadJob {
    pub fn new(manifest_url: StreamUrl, output_name: &str) -> Self {
        Self {
            manifest_url,
            output_path: PathBuf::from(normalize_output_name(output_name)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Success {
        output_path: PathBuf,
    },
    Failure {
        exit_code: Option<i32>,
        hints: &'static [&'static str],
    },
}

impl DownloadOutcome {
    pub fn into_result(self) -> Result<PathBuf, ToolingError> {
        match self {
            Self::Success { output_path } => Ok(output_path),
            Self::Failure { exit_code, .. } => Err(ToolingError::ProcessFailure { code: exit_code }),
        }
    }
}

pub struct DownloadSupervisor {
    program: PathBuf,
    search_path: SearchPath,
}

impl DownloadSupervisor {
    pub fn new(search_path: SearchPath) -> Self {
        Self::with_program(TRANSCODER_PROGRAM, search_path)
    }

    pub fn with_program(program: impl Into<PathBuf>, search_path: SearchPath) -> Self {
        Self {
            program: program.into(),
            search_path,
        }
    }

    pub fn command_line(&self, job: &DownloadJob) -> String {
        format!(
            "{} -i {} -c copy {}",
            self.program.display(),
            job.manifest_url,
            job.output_path.display()
        )
    }

    pub(super) fn build_command(&self, job: &DownloadJob) -> Command {
        let mut command = self.search_path.command(&self.program);
        command
            .arg("-i")
            .arg(job.manifest_url.as_str())
            .arg("-c")
            .arg("copy")
            .arg(&job.output_path);
        command
    }

    // Only the exit code decides the outcome.
    pub fn run<F>(&self, job: &DownloadJob, mut on_progress: F) -> Result<DownloadOutcome, ToolingError>
    where
        F: FnMut(&str),
    {
        let (reader, writer) = std::io::pipe()?;
        let mut command = self.build_command(job);
        command
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);

        log::debug!("Spawning {}", self.command_line(job));
        let mut child = command.spawn()?;
        // The command still owns write ends of the pipe; EOF only arrives once they are gone.
        drop(command);

        let mut reader = std::io::BufReader::new(reader);
        let mut raw_buffer = Vec::<u8>::new();
        while let Some(line) = read_lossy_process_line(&mut reader, &mut raw_buffer)? {
            if is_progress_line(&line) {
                on_progress(line.trim());
            }
        }

        let status = child.wait()?;
        log::debug!("FFmpeg finished with {status}");
        if status.success() {
            return Ok(DownloadOutcome::Success {
                output_path: job.output_path.clone(),
            });
        }
        Ok(DownloadOutcome::Failure {
            exit_code: status.code(),
            hints: &REMEDIATION_HINTS,
        })
    }
}
