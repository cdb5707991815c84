use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use url::Url;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::{exit_code_label, ProvisionStage, ToolingError};

mod commands;
mod install;
mod manifest;
mod media_io;
mod runtime;

pub use commands::*;
pub use install::*;
pub use manifest::*;
pub use media_io::*;
pub use runtime::*;
