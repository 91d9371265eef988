//! Archive validation and safe extraction (ZIP and TAR family)
//!
//! Entries that would land outside the destination (absolute paths, `..`
//! segments, drive letters) are skipped, never written. Extraction is not
//! atomic: a cancelled run leaves already written entries in place.

use crate::cancel::CancelFlag;
use crate::error::{AegnuxError, Result};
use crate::events::{Progress, Reporter};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use zip::ZipArchive;

/// Mode applied to extracted files under [`PermissionPolicy::Normalize`]
const SAFE_MODE: u32 = 0o644;
/// Upper bound on modes kept under [`PermissionPolicy::Preserve`]
const PRESERVE_MASK: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
}

impl ArchiveFormat {
    /// Detect the format from the file name
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(ArchiveFormat::TarBz2)
        } else {
            None
        }
    }
}

/// What happens to file modes of extracted entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionPolicy {
    /// Every file becomes `rw-r--r--`
    #[default]
    Normalize,
    /// Keep the archived mode, minus setuid/setgid/sticky and group/other write
    Preserve,
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Only extract entries with one of these extensions (e.g. `.dll`)
    pub allowed_extensions: Option<Vec<String>>,

    /// Replace existing files; when false they are counted as skipped
    pub overwrite: bool,

    pub permissions: PermissionPolicy,

    /// Recreate symlinks whose target stays inside the destination (TAR only)
    pub symlinks: bool,

    /// Minimum interval between progress reports
    pub progress_interval: Duration,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            allowed_extensions: None,
            overwrite: true,
            permissions: PermissionPolicy::Normalize,
            symlinks: false,
            progress_interval: Duration::from_millis(100),
        }
    }
}

impl ExtractOptions {
    /// Options suited for unpacking executables (runtime archives)
    pub fn executables() -> Self {
        Self {
            permissions: PermissionPolicy::Preserve,
            symlinks: true,
            ..Self::default()
        }
    }
}

/// Per-entry outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub total: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Whether `path` is a structurally readable archive
///
/// ZIP entries are fully decompressed so CRC mismatches are detected; TAR
/// archives must have an enumerable member list.
pub fn validate(path: &Path) -> bool {
    match validate_inner(path) {
        Ok(()) => true,
        Err(e) => {
            warn!("Archive {:?} failed validation: {}", path, e);
            false
        }
    }
}

fn validate_inner(path: &Path) -> Result<()> {
    let format =
        ArchiveFormat::detect(path).ok_or_else(|| AegnuxError::UnsupportedArchive(path.into()))?;
    match format {
        ArchiveFormat::Zip => {
            let mut zip = ZipArchive::new(BufReader::new(File::open(path)?))?;
            for i in 0..zip.len() {
                let mut entry = zip.by_index(i)?;
                io::copy(&mut entry, &mut io::sink())?;
            }
        }
        _ => {
            let mut archive = open_tar(path, format)?;
            for entry in archive.entries()? {
                entry?;
            }
        }
    }
    Ok(())
}

/// Extract `archive` into `dest` on a blocking worker thread
pub async fn extract(
    archive: PathBuf,
    dest: PathBuf,
    options: ExtractOptions,
    cancel: CancelFlag,
    reporter: Arc<dyn Reporter>,
) -> Result<ExtractStats> {
    tokio::task::spawn_blocking(move || {
        extract_blocking(&archive, &dest, &options, &cancel, reporter.as_ref())
    })
    .await?
}

/// Extract `archive` into `dest`, checking `cancel` before every entry
pub fn extract_blocking(
    archive: &Path,
    dest: &Path,
    options: &ExtractOptions,
    cancel: &CancelFlag,
    reporter: &dyn Reporter,
) -> Result<ExtractStats> {
    let format = ArchiveFormat::detect(archive)
        .ok_or_else(|| AegnuxError::UnsupportedArchive(archive.into()))?;
    if !archive.is_file() {
        return Err(AegnuxError::Archive(format!(
            "archive not found: {}",
            archive.display()
        )));
    }

    reporter.log(format!("[EXTRACTING] Starting extraction: {}", archive.display()));
    fs::create_dir_all(dest)?;

    let mut extractor = Extractor {
        label: archive.display().to_string(),
        dest,
        options,
        cancel,
        reporter,
        stats: ExtractStats::default(),
        processed: 0,
        last_report: Instant::now(),
    };

    let outcome = match format {
        ArchiveFormat::Zip => extractor.zip(archive),
        _ => extractor.tar(archive, format),
    };

    let stats = extractor.stats;
    if let Err(ref e) = outcome {
        if e.is_cancelled() {
            reporter.log(format!(
                "[EXTRACTING] Extraction cancelled by user after {}/{} files",
                extractor.processed, stats.total
            ));
        }
    }
    outcome?;

    reporter.log(format!(
        "[EXTRACTED] {} -> {}: {} extracted, {} skipped, {} errors",
        archive.display(),
        dest.display(),
        stats.extracted,
        stats.skipped,
        stats.errors
    ));
    Ok(stats)
}

fn open_tar(path: &Path, format: ArchiveFormat) -> Result<tar::Archive<Box<dyn Read>>> {
    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
        ArchiveFormat::TarBz2 => Box::new(BzDecoder::new(file)),
        ArchiveFormat::Tar => Box::new(file),
        ArchiveFormat::Zip => return Err(AegnuxError::UnsupportedArchive(path.into())),
    };
    Ok(tar::Archive::new(reader))
}

enum Decision {
    Write(PathBuf),
    Skip(&'static str),
}

struct Extractor<'a> {
    label: String,
    dest: &'a Path,
    options: &'a ExtractOptions,
    cancel: &'a CancelFlag,
    reporter: &'a dyn Reporter,
    stats: ExtractStats,
    processed: usize,
    last_report: Instant,
}

impl Extractor<'_> {
    fn zip(&mut self, archive: &Path) -> Result<()> {
        let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
        let files: Vec<usize> = (0..zip.len())
            .filter(|&i| zip.by_index_raw(i).map(|e| !e.is_dir()).unwrap_or(true))
            .collect();
        self.stats.total = files.len();

        for index in files {
            self.cancel.check()?;
            let mut entry = match zip.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    self.failed(&format!("entry #{}", index), &e.to_string());
                    continue;
                }
            };
            let name = entry.name().to_string();
            let mode = entry.unix_mode();
            self.file(&name, mode, |target| {
                let mut out = File::create(target)?;
                io::copy(&mut entry, &mut out).map(|_| ())
            });
        }
        Ok(())
    }

    fn tar(&mut self, archive: &Path, format: ArchiveFormat) -> Result<()> {
        self.stats.total = {
            let mut counting = open_tar(archive, format)?;
            let mut count = 0;
            for entry in counting.entries()? {
                if self.counts(entry?.header().entry_type()) {
                    count += 1;
                }
            }
            count
        };

        let mut tar = open_tar(archive, format)?;
        for entry in tar.entries()? {
            self.cancel.check()?;
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // a broken header leaves the stream unusable
                    self.failed(&self.label.clone(), &e.to_string());
                    break;
                }
            };
            let kind = entry.header().entry_type();
            if !self.counts(kind) {
                continue;
            }
            let name = match entry.path() {
                Ok(path) => path.to_string_lossy().into_owned(),
                Err(e) => {
                    self.failed("entry with unreadable path", &e.to_string());
                    continue;
                }
            };

            if kind.is_symlink() {
                let target = entry.link_name().ok().flatten().map(|t| t.into_owned());
                self.symlink(&name, target);
            } else {
                let mode = entry.header().mode().ok();
                self.file(&name, mode, |target| {
                    let mut out = File::create(target)?;
                    io::copy(&mut entry, &mut out).map(|_| ())
                });
            }
        }
        Ok(())
    }

    fn counts(&self, kind: tar::EntryType) -> bool {
        kind.is_file() || (self.options.symlinks && kind.is_symlink())
    }

    fn decide(&self, name: &str) -> Decision {
        let Some(relative) = sanitize(name) else {
            return Decision::Skip("unsafe path");
        };
        if let Some(ref allowed) = self.options.allowed_extensions {
            if !has_allowed_extension(&relative, allowed) {
                return Decision::Skip("extension not allowed");
            }
        }
        if crosses_symlink(self.dest, &relative) {
            return Decision::Skip("path crosses a symlink");
        }
        let target = self.dest.join(relative);
        if !self.options.overwrite && fs::symlink_metadata(&target).is_ok() {
            return Decision::Skip("already exists");
        }
        Decision::Write(target)
    }

    fn file<F>(&mut self, name: &str, mode: Option<u32>, write: F)
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        match self.decide(name) {
            Decision::Skip(reason) => self.skipped(name, reason),
            Decision::Write(target) => {
                let result = prepare_parent(&target)
                    .and_then(|()| unlink_symlink(&target))
                    .and_then(|()| write(&target))
                    .and_then(|()| self.apply_mode(&target, mode));
                match result {
                    Ok(()) => self.stats.extracted += 1,
                    Err(e) => self.failed(name, &e.to_string()),
                }
            }
        }
        self.advance();
    }

    fn symlink(&mut self, name: &str, link_target: Option<PathBuf>) {
        match (self.decide(name), link_target) {
            (Decision::Skip(reason), _) => self.skipped(name, reason),
            (Decision::Write(_), None) => self.failed(name, "symlink without target"),
            (Decision::Write(target), Some(link)) => {
                let relative = target.strip_prefix(self.dest).unwrap_or(&target);
                if !link_stays_inside(self.dest, relative, &link) {
                    self.skipped(name, "symlink escapes destination");
                } else {
                    let result = prepare_parent(&target).and_then(|()| {
                        if fs::symlink_metadata(&target).is_ok() {
                            fs::remove_file(&target)?;
                        }
                        std::os::unix::fs::symlink(&link, &target)
                    });
                    match result {
                        Ok(()) => self.stats.extracted += 1,
                        Err(e) => self.failed(name, &e.to_string()),
                    }
                }
            }
        }
        self.advance();
    }

    fn apply_mode(&self, target: &Path, archived: Option<u32>) -> io::Result<()> {
        let mode = match self.options.permissions {
            PermissionPolicy::Normalize => SAFE_MODE,
            PermissionPolicy::Preserve => match archived {
                Some(mode) => mode & PRESERVE_MASK,
                None => return Ok(()),
            },
        };
        fs::set_permissions(target, fs::Permissions::from_mode(mode))
    }

    fn skipped(&mut self, name: &str, reason: &str) {
        self.stats.skipped += 1;
        if matches!(
            reason,
            "unsafe path" | "symlink escapes destination" | "path crosses a symlink"
        ) {
            warn!("Skipping {:?}: {}", name, reason);
            self.reporter
                .log(format!("[WARNING] Skipping {}: {}", name, reason));
        } else {
            debug!("Skipping {:?}: {}", name, reason);
        }
    }

    fn failed(&mut self, name: &str, error: &str) {
        self.stats.errors += 1;
        warn!("Failed to extract {:?}: {}", name, error);
        self.reporter
            .log(format!("[ERROR] Failed to extract {}: {}", name, error));
    }

    /// Count one processed entry and report progress when due
    fn advance(&mut self) {
        self.processed += 1;
        let now = Instant::now();
        let last = self.processed >= self.stats.total;
        if !last && now.duration_since(self.last_report) < self.options.progress_interval {
            return;
        }
        self.last_report = now;

        let progress = Progress::ratio(self.processed as u64, self.stats.total as u64);
        let percent = match progress {
            Progress::Percent(p) => p,
            Progress::Indeterminate => 0,
        };
        self.reporter.progress(progress);
        self.reporter.log(format!(
            "[EXTRACTING] {}: {}/{} files ({}%)",
            self.label, self.processed, self.stats.total, percent
        ));
    }
}

fn prepare_parent(target: &Path) -> io::Result<()> {
    match target.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Relative path for an archive entry name, or `None` if it could escape the root
pub fn sanitize(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_letter(&normalized) {
        return None;
    }

    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

fn has_drive_letter(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn has_allowed_extension(path: &Path, allowed: &[String]) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };
    let ext = format!(".{}", ext.to_string_lossy().to_lowercase());
    allowed
        .iter()
        .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(&ext[1..]))
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Whether any existing directory between `dest` and the entry is a symlink
///
/// Writing through such a directory would land wherever the link points.
fn crosses_symlink(dest: &Path, relative: &Path) -> bool {
    let mut current = dest.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        if is_symlink(&current) {
            return true;
        }
    }
    false
}

/// Replace rather than follow a symlink already sitting at `target`
fn unlink_symlink(target: &Path) -> io::Result<()> {
    if is_symlink(target) {
        fs::remove_file(target)?;
    }
    Ok(())
}

/// Whether a link at `relative` pointing to `link` resolves inside `dest`
///
/// The link is resolved lexically from its parent directory; a link whose
/// path steps through an existing symlink is refused, since its real
/// location cannot be known lexically.
fn link_stays_inside(dest: &Path, relative: &Path, link: &Path) -> bool {
    if link.is_absolute() {
        return false;
    }
    let mut resolved: Vec<Component> = relative.components().collect();
    resolved.pop();

    let mut components = link.components().peekable();
    while let Some(component) = components.next() {
        match component {
            Component::Normal(_) => {
                resolved.push(component);
                let more = components.peek().is_some();
                let on_disk: PathBuf = dest.join(resolved.iter().collect::<PathBuf>());
                if more && is_symlink(&on_disk) {
                    return false;
                }
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if resolved.pop().is_none() {
                    return false;
                }
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryReporter;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    /// Header with raw name bytes, so traversal entries can be produced
    fn raw_header(name: &str, kind: tar::EntryType, size: u64, mode: u32, link: &str) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        {
            let gnu = header.as_gnu_mut().unwrap();
            gnu.name[..name.len()].copy_from_slice(name.as_bytes());
            gnu.linkname[..link.len()].copy_from_slice(link.as_bytes());
        }
        header.set_size(size);
        header.set_mode(mode);
        header.set_entry_type(kind);
        header.set_cksum();
        header
    }

    fn write_tar_gz(path: &Path, entries: &[(&str, &str, u32)]) {
        let encoder =
            flate2::write::GzEncoder::new(File::create(path).unwrap(), flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        for (name, data, mode) in entries {
            let header = raw_header(name, tar::EntryType::Regular, data.len() as u64, *mode, "");
            builder.append(&header, data.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn run(archive: &Path, dest: &Path, options: &ExtractOptions) -> Result<ExtractStats> {
        extract_blocking(archive, dest, options, &CancelFlag::new(), &MemoryReporter::new())
    }

    #[test]
    fn traversal_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("plugins.zip");
        write_zip(
            &archive,
            &[
                ("a.dll", "a"),
                ("sub/b.dll", "b"),
                ("sub/deeper/c.txt", "c"),
                ("../evil.dll", "evil"),
            ],
        );
        let dest = dir.path().join("out");

        let stats = run(&archive, &dest, &ExtractOptions::default()).unwrap();

        assert_eq!(
            stats,
            ExtractStats {
                total: 4,
                extracted: 3,
                skipped: 1,
                errors: 0
            }
        );
        assert!(dest.join("sub/deeper/c.txt").is_file());
        assert!(!dir.path().join("evil.dll").exists());
    }

    #[test]
    fn tar_traversal_and_absolute_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("runner.tar.gz");
        write_tar_gz(
            &archive,
            &[
                ("bin/wine", "#!/bin/sh\n", 0o755),
                ("../escape", "x", 0o644),
                ("/etc/aegnux-abs", "x", 0o644),
            ],
        );
        let dest = dir.path().join("nested").join("out");

        let stats = run(&archive, &dest, &ExtractOptions::default()).unwrap();

        assert_eq!(stats.extracted, 1);
        assert_eq!(stats.skipped, 2);
        assert!(!dir.path().join("nested").join("escape").exists());
        assert!(!Path::new("/etc/aegnux-abs").exists());
    }

    #[test]
    fn extension_allow_list_filters_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("codecs.zip");
        write_zip(&archive, &[("x.DLL", "1"), ("y.ax", "2"), ("readme.txt", "3")]);

        let options = ExtractOptions {
            allowed_extensions: Some(vec![".dll".into(), "ax".into()]),
            ..Default::default()
        };
        let stats = run(&archive, &dir.path().join("out"), &options).unwrap();

        assert_eq!(stats.extracted, 2);
        assert_eq!(stats.skipped, 1);
        assert!(!dir.path().join("out/readme.txt").exists());
    }

    #[test]
    fn repeated_extraction_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("one", "1"), ("two/three", "3")]);
        let dest = dir.path().join("out");

        let first = run(&archive, &dest, &ExtractOptions::default()).unwrap();
        let second = run(&archive, &dest, &ExtractOptions::default()).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(dest.join("two/three")).unwrap(), b"3");

        let keep = ExtractOptions {
            overwrite: false,
            ..Default::default()
        };
        let third = run(&archive, &dest, &keep).unwrap();
        assert_eq!(third.skipped, third.total);
        assert_eq!(third.extracted, 0);
    }

    #[test]
    fn permissions_are_normalized_or_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("runner.tar.gz");
        write_tar_gz(&archive, &[("bin/wine", "#!/bin/sh\n", 0o4777)]);

        let normalized = dir.path().join("n");
        run(&archive, &normalized, &ExtractOptions::default()).unwrap();
        let mode = fs::metadata(normalized.join("bin/wine")).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o644);

        let preserved = dir.path().join("p");
        run(&archive, &preserved, &ExtractOptions::executables()).unwrap();
        let mode = fs::metadata(preserved.join("bin/wine")).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o755);
    }

    #[test]
    fn symlinks_must_stay_inside_destination() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("runner.tar");
        {
            let mut builder = tar::Builder::new(File::create(&archive).unwrap());
            let lib = raw_header("lib/libwine.so.1.0", tar::EntryType::Regular, 3, 0o755, "");
            builder.append(&lib, &b"elf"[..]).unwrap();
            for (name, target) in [
                ("lib/libwine.so.1", "libwine.so.1.0"),
                ("lib/evil", "../../etc/passwd"),
            ] {
                let link = raw_header(name, tar::EntryType::Symlink, 0, 0o777, target);
                builder.append(&link, io::empty()).unwrap();
            }
            builder.finish().unwrap();
        }
        let dest = dir.path().join("out");

        let stats = run(&archive, &dest, &ExtractOptions::executables()).unwrap();

        assert_eq!(stats.total, 3);
        assert_eq!(stats.extracted, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(fs::read(dest.join("lib/libwine.so.1")).unwrap(), b"elf");
        assert!(fs::symlink_metadata(dest.join("lib/evil")).is_err());

        // without symlink support only the regular file counts
        let plain = run(&archive, &dir.path().join("plain"), &ExtractOptions::default()).unwrap();
        assert_eq!(plain.total, 1);
    }

    #[test]
    fn chained_symlinks_cannot_redirect_writes() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("runner.tar");
        {
            let mut builder = tar::Builder::new(File::create(&archive).unwrap());
            for (name, target) in [("deep/a", ".."), ("deep/a/l", "..")] {
                let link = raw_header(name, tar::EntryType::Symlink, 0, 0o777, target);
                builder.append(&link, io::empty()).unwrap();
            }
            let file = raw_header("deep/a/l/pwn", tar::EntryType::Regular, 3, 0o644, "");
            builder.append(&file, &b"pwn"[..]).unwrap();
            builder.finish().unwrap();
        }
        let dest = dir.path().join("out");

        let stats = run(&archive, &dest, &ExtractOptions::executables()).unwrap();

        assert_eq!(stats.total, 3);
        assert_eq!(stats.extracted, 1);
        assert_eq!(stats.skipped, 2);
        assert!(fs::symlink_metadata(dest.join("deep/a")).unwrap().file_type().is_symlink());
        assert!(!dir.path().join("pwn").exists());
        assert!(!dest.join("pwn").exists());
    }

    #[test]
    fn links_resolving_through_other_links_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        fs::create_dir_all(dest.join("deep")).unwrap();
        std::os::unix::fs::symlink("..", dest.join("deep/a")).unwrap();

        // lexically inside, really the parent of `dest`
        assert!(!link_stays_inside(&dest, Path::new("deep/b"), Path::new("a/../..")));
        assert!(link_stays_inside(&dest, Path::new("deep/b"), Path::new("../lib")));
        assert!(!link_stays_inside(&dest, Path::new("b"), Path::new("..")));
    }

    #[test]
    fn existing_symlink_is_replaced_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        let outside = dir.path().join("victim");
        fs::write(&outside, b"keep").unwrap();
        std::os::unix::fs::symlink(&outside, dest.join("a.dll")).unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("a.dll", "new")]);

        let stats = run(&archive, &dest, &ExtractOptions::default()).unwrap();

        assert_eq!(stats.extracted, 1);
        assert_eq!(fs::read(&outside).unwrap(), b"keep");
        assert_eq!(fs::read(dest.join("a.dll")).unwrap(), b"new");
    }

    #[test]
    fn cancellation_stops_before_next_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("one", "1"), ("two", "2")]);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let reporter = MemoryReporter::new();

        let err = extract_blocking(
            &archive,
            &dir.path().join("out"),
            &ExtractOptions::default(),
            &cancel,
            &reporter,
        )
        .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dir.path().join("out/one").exists());
        assert!(reporter.lines().iter().any(|l| l.contains("cancelled")));
    }

    #[test]
    fn final_entry_always_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("one", "1"), ("two", "2"), ("three", "3")]);
        let reporter = MemoryReporter::new();
        let options = ExtractOptions {
            progress_interval: Duration::from_secs(3600),
            ..Default::default()
        };

        extract_blocking(&archive, &dir.path().join("out"), &options, &CancelFlag::new(), &reporter)
            .unwrap();

        assert_eq!(reporter.progress_values(), vec![Progress::Percent(100)]);
        assert!(reporter.lines().iter().any(|l| l.contains("3/3 files (100%)")));
    }

    #[test]
    fn validation_detects_corruption_and_unknown_formats() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.zip");
        write_zip(&good, &[("one", "some content here")]);
        assert!(validate(&good));

        let bytes = fs::read(&good).unwrap();
        let truncated = dir.path().join("truncated.zip");
        fs::write(&truncated, &bytes[..bytes.len() / 2]).unwrap();
        assert!(!validate(&truncated));

        let tarball = dir.path().join("good.tar.gz");
        write_tar_gz(&tarball, &[("x", "x", 0o644)]);
        assert!(validate(&tarball));

        let garbage = dir.path().join("garbage.tar.gz");
        fs::write(&garbage, b"definitely not gzip").unwrap();
        assert!(!validate(&garbage));

        let other = dir.path().join("file.rar");
        fs::write(&other, b"x").unwrap();
        assert!(!validate(&other));
    }

    #[test]
    fn sanitize_rejects_escaping_names() {
        assert_eq!(sanitize("a/./b.dll"), Some(PathBuf::from("a/b.dll")));
        assert_eq!(sanitize("..\\evil.dll"), None);
        assert_eq!(sanitize("a/../../b"), None);
        assert_eq!(sanitize("/abs"), None);
        assert_eq!(sanitize("C:/windows/x.dll"), None);
        assert_eq!(sanitize("./"), None);
    }

    #[test]
    fn formats_are_detected_from_names() {
        assert_eq!(ArchiveFormat::detect(Path::new("x.ZIP")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect(Path::new("w.tgz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(Path::new("w.tar.bz2")), Some(ArchiveFormat::TarBz2));
        assert_eq!(ArchiveFormat::detect(Path::new("w.tar.xz")), None);
    }
}
