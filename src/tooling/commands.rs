// Interactive download session exposed to the command-line entry point.
use super::*;
use console::style;

const SEPARATOR_WIDTH: usize = 50;

fn prompt_line<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    prompt: &str,
) -> Result<String, ToolingError> {
    write!(output, "{prompt}")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

pub fn report_error<W: Write>(output: &mut W, error: &ToolingError) -> std::io::Result<()> {
    writeln!(output)?;
    match error {
        ToolingError::BinaryUnavailable {
            reason,
            instructions,
        } => {
            writeln!(output, "{} {reason}", style("FFmpeg unavailable:").red().bold())?;
            writeln!(output, "Install FFmpeg manually:")?;
            for line in instructions {
                writeln!(output, "   {line}")?;
            }
        }
        ToolingError::ProvisioningFailed {
            stage,
            cause,
            listing,
        } => {
            writeln!(
                output,
                "{} {stage} step failed: {cause}",
                style("FFmpeg installation failed:").red().bold()
            )?;
            if !listing.is_empty() {
                writeln!(output, "Install directory contents:")?;
                for entry in listing {
                    writeln!(output, " - {entry}")?;
                }
            }
            writeln!(output, "Install FFmpeg manually and run again.")?;
        }
        ToolingError::InvalidUrl { url } => {
            writeln!(output, "{} {url}", style("Invalid URL:").red().bold())?;
            writeln!(
                output,
                "The URL must contain '{THUMBNAIL_FRAGMENT}' or '{MANIFEST_FRAGMENT}'."
            )?;
        }
        ToolingError::ProcessFailure { code } => {
            writeln!(
                output,
                "{} FFmpeg returned {}",
                style("Download failed!").red().bold(),
                exit_code_label(code)
            )?;
            writeln!(output, "Possible fixes:")?;
            for (index, hint) in REMEDIATION_HINTS.iter().enumerate() {
                writeln!(output, "{}. {hint}", index + 1)?;
            }
        }
        ToolingError::Unexpected(cause) => {
            writeln!(output, "{} {cause}", style("Unexpected error:").red().bold())?;
        }
    }
    Ok(())
}

pub fn run_session<P, F, R, W>(
    locator: &mut BinaryLocator<P, F>,
    settings: &RuntimeSettings,
    mut input: R,
    mut output: W,
) -> Result<PathBuf, ToolingError>
where
    P: TranscoderProbe,
    F: ArchiveFetcher,
    R: BufRead,
    W: Write,
{
    writeln!(output, "{}", style("Cloudflare Stream downloader").bold())?;
    writeln!(output, "{}", "=".repeat(SEPARATOR_WIDTH))?;

    locator.ensure_available()?;
    writeln!(output, "\n{}", style("FFmpeg is ready").green())?;

    let source_url = prompt_line(
        &mut input,
        &mut output,
        &format!("\nStream URL (containing {THUMBNAIL_FRAGMENT} or {MANIFEST_FRAGMENT}): "),
    )?;
    let mut output_name = prompt_line(
        &mut input,
        &mut output,
        &format!("Output file name ({OUTPUT_EXTENSION} is added automatically): "),
    )?;
    if output_name.is_empty() {
        output_name = settings.default_output_name.clone();
    }

    let manifest_url = to_manifest_url(&source_url)?;
    writeln!(output, "\nManifest URL:\n{manifest_url}")?;

    let job = DownloadJob::new(manifest_url, &output_name);
    let supervisor = locator.download_supervisor();
    writeln!(output, "\n{}", "-".repeat(SEPARATOR_WIDTH))?;
    writeln!(output, "Running:\n{}", supervisor.command_line(&job))?;
    writeln!(output, "{}\n", "-".repeat(SEPARATOR_WIDTH))?;

    let mut write_error: Option<std::io::Error> = None;
    let outcome = supervisor.run(&job, |line| {
        if write_error.is_none() {
            if let Err(error) = writeln!(output, "{line}") {
                write_error = Some(error);
            }
        }
    })?;
    if let Some(error) = write_error {
        log::warn!("Failed to print progress: {error}");
    }

    let saved = outcome.into_result()?;
    writeln!(
        output,
        "\n{} {}",
        style("Download complete! Saved as:").green().bold(),
        saved.display()
    )?;
    Ok(saved)
}
