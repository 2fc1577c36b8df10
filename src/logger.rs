//! Append-only script log with call-site attribution, plus the CSV data
//! file helpers backups are written through.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::site::Site;

pub const START_SCRIPT: &str = "-------------/ Start of Script \\--------------";
pub const END_SCRIPT: &str = "\n-------------\\  End of Script  /--------------\n\n";

/// Row written in place of one that cannot be encoded as UTF-8
pub const ENCODING_PLACEHOLDER: &str = "UnicodeEncodeError";

const TAIL_CHUNK: usize = 1024;

const TIME_FORMAT: &str = "%I:%M:%S %p %Z";

/// Zone named by `TZ`, else the system zone, else UTC
fn local_zone() -> Tz {
    static ZONE: OnceLock<Tz> = OnceLock::new();
    *ZONE.get_or_init(|| {
        let from_env = std::env::var("TZ")
            .ok()
            .and_then(|tz| tz.trim_start_matches(':').parse::<Tz>().ok());
        from_env
            .or_else(|| iana_time_zone::get_timezone().ok()?.parse::<Tz>().ok())
            .unwrap_or_else(|| {
                debug!("could not resolve local time zone, using UTC");
                Tz::UTC
            })
    })
}

fn local_now() -> DateTime<Tz> {
    Utc::now().with_timezone(&local_zone())
}

pub fn now_date() -> String {
    local_now().format("%m/%d/%Y").to_string()
}

/// `HH:MM:SS AM/PM` followed by the zone abbreviation, e.g. `EDT`
pub fn now_time() -> String {
    format_time(local_now())
}

fn format_time(at: DateTime<Tz>) -> String {
    at.format(TIME_FORMAT).to_string()
}

/// Date stamp safe to use inside a file name
pub fn date_filename() -> String {
    local_now().format("%m.%d.%Y").to_string()
}

/// Process-wide script log.
///
/// Every entry goes to the end of the file on its own line, preceded by a
/// newline, so consecutive entries are separated the way operators are used
/// to reading them. The file handle lives as long as the logger.
pub struct Logger {
    path: PathBuf,
    file: File,
    echo: bool,
}

impl Logger {
    /// Open (or create) the log file for appending
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "opened script log");
        Ok(Self { path, file, echo: true })
    }

    /// Whether entries are also printed to stdout
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[track_caller]
    pub fn write_line(&self, text: &str) -> io::Result<()> {
        self.write_line_at(Site::caller(), text)
    }

    /// Append `text` attributed to `site`.
    ///
    /// An empty `text` appends a bare newline; the script banners are
    /// written verbatim.
    pub fn write_line_at(&self, site: Site, text: &str) -> io::Result<()> {
        let entry = if text.is_empty() {
            String::new()
        } else if text == START_SCRIPT || text == END_SCRIPT {
            text.to_string()
        } else {
            format!("[{} {}, {}] {} ", now_date(), now_time(), site, text)
        };

        (&self.file).write_all(format!("\n{}", entry).as_bytes())?;
        if self.echo {
            println!("{}", entry);
        }
        Ok(())
    }

    /// Log an error reported at `line` of the calling file and hand the
    /// formatted message back for propagation.
    #[track_caller]
    pub fn record_error(&self, message: &str, line: u32) -> io::Result<String> {
        let site = Site::caller();
        let formatted = format!(
            "  Error [File: {} Line: {}] - {}",
            site.file_name(),
            line,
            message
        );
        self.write_line_at(site, &formatted)?;
        Ok(formatted)
    }

    #[track_caller]
    pub fn mark_start(&self) -> io::Result<()> {
        let site = Site::caller();
        self.write_line_at(site, &format!("Starting Script: {}", site.file_name()))
    }

    #[track_caller]
    pub fn mark_end(&self) -> io::Result<()> {
        let site = Site::caller();
        self.write_line_at(site, &format!("Ending Script: {}", site.file_name()))
    }

    /// Create or truncate a CSV data file
    #[track_caller]
    pub fn create_output_file(&self, name: impl AsRef<Path>) -> io::Result<()> {
        let name = name.as_ref();
        self.write_line_at(
            Site::caller(),
            &format!("Creating File: \"{}\"", name.display()),
        )?;
        File::create(name)?;
        Ok(())
    }

    /// Append one CSV record to `filename`.
    ///
    /// The "Writing Data to" notice is only logged when it is not already
    /// the last line of the log, so a run of writes to one file logs it once.
    #[track_caller]
    pub fn append_row<I, T>(&self, filename: impl AsRef<Path>, row: I) -> io::Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let site = Site::caller();
        let filename = filename.as_ref();

        let notice = format!("Writing Data to: \"{}\"", filename.display());
        if !tail_line(&self.path)?.contains(&notice) {
            self.write_line_at(site, &notice)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(filename)?;
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);

        let fields: Vec<T> = row.into_iter().collect();
        if fields.iter().all(|f| std::str::from_utf8(f.as_ref()).is_ok()) {
            writer.write_record(&fields)?;
        } else {
            warn!(file = %filename.display(), "row is not valid UTF-8, writing placeholder");
            writer.write_record([ENCODING_PLACEHOLDER])?;
        }
        writer.flush()
    }
}

/// Last line of a file, without its line terminator.
///
/// Reads backwards from the end in small chunks, so only the tail of the
/// file is touched. Files without a newline before the last line are read
/// from the start.
pub fn tail_line(path: impl AsRef<Path>) -> io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(String::new());
    }

    let mut end = len;
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        end -= 1;
    }

    let mut start = 0;
    let mut pos = end;
    let mut buf = [0u8; TAIL_CHUNK];
    while pos > 0 {
        let n = (TAIL_CHUNK as u64).min(pos) as usize;
        pos -= n as u64;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut buf[..n])?;
        if let Some(i) = buf[..n].iter().rposition(|&b| b == b'\n') {
            start = pos + i as u64 + 1;
            break;
        }
    }

    let mut line = Vec::with_capacity((end - start) as usize);
    file.seek(SeekFrom::Start(start))?;
    file.take(end - start).read_to_end(&mut line)?;

    let line = String::from_utf8_lossy(&line);
    Ok(line.strip_suffix('\r').unwrap_or(&line).to_string())
}

/// Delete every file in `directory` named `*.<extension>`.
///
/// Returns how many files were removed. There is no confirmation step.
pub fn purge_files(extension: &str, directory: impl AsRef<Path>) -> io::Result<usize> {
    let suffix = format!(".{}", extension);
    let mut removed = 0;

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().ends_with(&suffix) {
            fs::remove_file(entry.path())?;
            debug!(file = %entry.path().display(), "purged");
            removed += 1;
        }
    }

    Ok(removed)
}
