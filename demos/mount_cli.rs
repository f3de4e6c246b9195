//! Mounts an ISO 9660 or PKZIP image and either prints its tree or
//! extracts it into the current directory, the way `unzip.rs` did for
//! plain ZIP archives. Format is picked by file extension unless `--iso`
//! or `--zip` forces it.

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::*;
use camino::{Utf8Path, Utf8PathBuf};
use log::*;
use memmap2::Mmap;
use rayon::prelude::*;
use structopt::*;

use archivefs::{Backend, ByteSource, CaseFold, FileSystem, InMemorySource, IsoBackend, IsoOptions, ZipBackend, ZipOptions};

#[derive(Debug, StructOpt)]
#[structopt(name = "mount_cli", about = "Dumps an ISO 9660 or ZIP archive into the current directory")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Change to the given directory before performing any operations.
    #[structopt(short = "C", long)]
    directory: Option<PathBuf>,

    /// Prints the tree of files in the archive instead of extracting them.
    #[structopt(short = "n", long)]
    dry_run: bool,

    /// Force ISO 9660 parsing, regardless of the file's extension.
    #[structopt(long, conflicts_with = "zip")]
    iso: bool,

    /// Force ZIP parsing, regardless of the file's extension.
    #[structopt(long)]
    zip: bool,

    /// Fold ISO 9660 path lookups to a single case. Ignored for ZIP.
    #[structopt(long, default_value = "lower", possible_values = &["none", "upper", "lower"])]
    case_fold: String,

    #[structopt(name("archive"))]
    archive_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    if let Some(chto) = args.directory {
        std::env::set_current_dir(&chto)
            .with_context(|| format!("Couldn't set working directory to {}", chto.display()))?;
    }

    let is_iso = args.iso
        || (!args.zip
            && args
                .archive_path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("iso"))
                .unwrap_or(false));

    info!("Memory mapping {:#?}", &args.archive_path);
    let file = File::open(&args.archive_path).context("Couldn't open archive file")?;
    let mapping = unsafe { Mmap::map(&file).context("Couldn't mmap archive file")? };
    let source: Arc<dyn ByteSource> = Arc::new(InMemorySource::new(mapping[..].to_vec()));

    let name = args
        .archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());

    let fs: Box<dyn FileSystem> = if is_iso {
        let case_fold = match args.case_fold.as_str() {
            "none" => CaseFold::None,
            "upper" => CaseFold::Upper,
            _ => CaseFold::Lower,
        };
        IsoBackend::default()
            .create(IsoOptions { data: source, name, case_fold })
            .context("Couldn't mount ISO 9660 image")?
    } else {
        ZipBackend::default()
            .create(ZipOptions { data: source, name, lazy: true })
            .context("Couldn't mount ZIP archive")?
    };

    if args.dry_run {
        print_tree(&*fs)
    } else {
        extract_tree(&*fs)
    }
}

/// Walks the mounted tree depth-first, collecting every file path.
fn walk_files(fs: &dyn FileSystem, dir: &Utf8Path, out: &mut Vec<Utf8PathBuf>) -> Result<()> {
    for name in fs.readdir_sync(dir).with_context(|| format!("Couldn't list {dir}"))? {
        let child = dir.join(&name);
        let stat = fs.stat_sync(&child).with_context(|| format!("Couldn't stat {child}"))?;
        if stat.is_dir() {
            walk_files(fs, &child, out)?;
        } else {
            out.push(child);
        }
    }
    Ok(())
}

fn print_tree(fs: &dyn FileSystem) -> Result<()> {
    let mut files = Vec::new();
    walk_files(fs, Utf8Path::new("/"), &mut files)?;
    files.sort();
    for path in files {
        println!("{path}");
    }
    Ok(())
}

fn extract_tree(fs: &dyn FileSystem) -> Result<()> {
    let mut files = Vec::new();
    walk_files(fs, Utf8Path::new("/"), &mut files)?;

    files.par_iter().try_for_each(|path| -> Result<()> {
        let relative = path.strip_prefix("/").unwrap_or(path);
        if let Some(parent) = relative.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Couldn't create directory {parent}"))?;
            }
        }

        let stat = fs.stat_sync(path).with_context(|| format!("Couldn't stat {path}"))?;
        let mut buf = vec![0u8; stat.size as usize];
        fs.read_sync(path, &mut buf, 0, stat.size)
            .with_context(|| format!("Couldn't read {path}"))?;

        let mut sink =
            File::create(relative).with_context(|| format!("Couldn't create file {relative}"))?;
        io::copy(&mut &buf[..], &mut sink)?;
        Ok(())
    })
}
