use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::matcher::best_candidate;
use facegate_core::{
    find_best_match, Descriptor, IdentityRecord, JsonFile, LoadStatus, Settings, StoreBackend, TemplateStore,
    Threshold,
};
use facegate_hw::Camera;
use serde::Deserialize;
use serde_json::json;

#[derive(Parser)]
#[command(name = "facegate", version, about = "Facegate template store maintenance and camera diagnostics")]
struct Cli {
    /// Template store file (default: $XDG_DATA_HOME/facegate/templates.json)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List enrolled identities in store order
    List,
    /// Show one identity
    Show {
        /// User id
        id: String,
    },
    /// Change an identity's display name (1-8 characters)
    Rename { id: String, name: String },
    /// Remove an identity
    Remove { id: String },
    /// Delete every identity
    Reset {
        /// Required; reset cannot be undone
        #[arg(long)]
        yes: bool,
    },
    /// Match a descriptor file against the store
    Match {
        /// JSON array of floats, or an object with a "descriptor" array
        descriptor: PathBuf,
        /// Similarity threshold, snapped to 0.1 steps (default 0.5)
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Capture one camera frame and save it as PNG
    Snapshot {
        #[arg(long, default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value = "snapshot.png")]
        out: PathBuf,
        #[arg(long, default_value_t = 320)]
        width: u32,
        #[arg(long, default_value_t = 240)]
        height: u32,
    },
}

impl Commands {
    fn mutates_store(&self) -> bool {
        matches!(self, Commands::Rename { .. } | Commands::Remove { .. } | Commands::Reset { .. })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut out = io::stdout().lock();

    if let Commands::Snapshot {
        device,
        out: path,
        width,
        height,
    } = &cli.command
    {
        return snapshot(device, path, *width, *height, &mut out);
    }

    let path = cli.store.clone().unwrap_or_else(facegate_core::default_store_path);
    let (mut store, status) = TemplateStore::load(JsonFile::new(&path));
    tracing::debug!(path = %path.display(), ?status, "store opened");
    if let LoadStatus::Corrupt(err) = &status {
        if cli.command.mutates_store() {
            bail!("refusing to modify unreadable store {}: {err}", path.display());
        }
        eprintln!("warning: {err}; showing an empty store");
    }

    run(cli.command, &mut store, cli.json, &mut out)
}

/// Execute a store command, writing results to `out`.
fn run<B: StoreBackend>(
    command: Commands,
    store: &mut TemplateStore<B>,
    as_json: bool,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Commands::List => list(store, as_json, out),
        Commands::Show { id } => {
            let record = store
                .get(&id)
                .with_context(|| format!("no identity with id {id}"))?;
            if as_json {
                writeln!(out, "{}", serde_json::to_string_pretty(&record_json(&id, record))?)?;
            } else {
                writeln!(out, "id:            {id}")?;
                writeln!(out, "name:          {}", record.name)?;
                writeln!(out, "registered at: {}", record.registered_at)?;
                writeln!(out, "samples:       {}", record.sample_count)?;
                writeln!(out, "descriptor:    {} values", record.descriptor.len())?;
            }
            Ok(())
        }
        Commands::Rename { id, name } => {
            store
                .rename(&id, &name)
                .with_context(|| format!("failed to rename {id}"))?;
            writeln!(out, "Renamed {id} to {name}")?;
            Ok(())
        }
        Commands::Remove { id } => {
            let removed = store
                .delete(&id)
                .with_context(|| format!("failed to remove {id}"))?;
            writeln!(out, "Removed {id} ({})", removed.name)?;
            Ok(())
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("reset deletes every identity; pass --yes to confirm");
            }
            let count = store.len();
            store.reset().context("failed to reset store")?;
            writeln!(out, "Removed {count} identities")?;
            Ok(())
        }
        Commands::Match { descriptor, threshold } => {
            let probe = read_descriptor(&descriptor)?;
            let threshold = threshold
                .map(Threshold::from_value)
                .unwrap_or(Settings::default().threshold);
            match_probe(store, &probe, threshold, as_json, out)
        }
        Commands::Snapshot { .. } => bail!("snapshot does not use the store"),
    }
}

fn list<B: StoreBackend>(store: &TemplateStore<B>, as_json: bool, out: &mut dyn Write) -> Result<()> {
    if as_json {
        let entries: Vec<_> = store
            .list()
            .map(|entry| record_json(entry.id, entry.record))
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?;
        return Ok(());
    }

    if store.is_empty() {
        writeln!(out, "No identities enrolled")?;
        return Ok(());
    }
    writeln!(out, "{:<16} {:<8} {:>7}  REGISTERED", "ID", "NAME", "SAMPLES")?;
    for entry in store.list() {
        writeln!(
            out,
            "{:<16} {:<8} {:>7}  {}",
            entry.id, entry.record.name, entry.record.sample_count, entry.record.registered_at
        )?;
    }
    Ok(())
}

fn match_probe<B: StoreBackend>(
    store: &TemplateStore<B>,
    probe: &Descriptor,
    threshold: Threshold,
    as_json: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let matched = find_best_match(probe, store.list(), threshold);
    let closest = best_candidate(probe, store.list());

    if as_json {
        let value = json!({
            "threshold": threshold.value(),
            "match": matched.as_ref().map(|m| json!({"id": m.id, "name": m.name, "similarity": m.similarity})),
            "closest": closest.as_ref().map(|c| json!({"id": c.id, "name": c.name, "similarity": c.similarity})),
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        return Ok(());
    }

    match (matched, closest) {
        (Some(m), _) => writeln!(out, "Match: {} ({}) similarity {:.3}", m.name, m.id, m.similarity)?,
        (None, Some(c)) => writeln!(
            out,
            "No match above {:.1}; closest {} ({}) at {:.3}",
            threshold.value(),
            c.name,
            c.id,
            c.similarity
        )?,
        (None, None) if store.is_empty() => writeln!(out, "No match: store is empty")?,
        (None, None) => writeln!(
            out,
            "No match: no enrolled descriptor has length {}",
            probe.len()
        )?,
    }
    Ok(())
}

fn record_json(id: &str, record: &IdentityRecord) -> serde_json::Value {
    json!({
        "id": id,
        "name": record.name,
        "registered_at": record.registered_at,
        "sample_count": record.sample_count,
        "descriptor_len": record.descriptor.len(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorFile {
    Bare(Vec<f32>),
    Wrapped {
        #[serde(alias = "features")]
        descriptor: Vec<f32>,
    },
}

fn read_descriptor(path: &Path) -> Result<Descriptor> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read descriptor {}", path.display()))?;
    let values = match serde_json::from_str(&text)
        .with_context(|| format!("{} is not a descriptor file", path.display()))?
    {
        DescriptorFile::Bare(values) | DescriptorFile::Wrapped { descriptor: values } => values,
    };
    if values.is_empty() {
        bail!("descriptor in {} is empty", path.display());
    }
    Ok(Descriptor::new(values))
}

fn snapshot(device: &str, path: &Path, width: u32, height: u32, out: &mut dyn Write) -> Result<()> {
    let camera = Camera::open(device, width, height).with_context(|| format!("failed to open {device}"))?;
    let frame = camera.capture_frame().context("failed to capture frame")?;
    let (w, h) = (frame.width, frame.height);
    let image = image::GrayImage::from_raw(w, h, frame.data)
        .context("frame size does not match its dimensions")?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    writeln!(out, "Saved {w}x{h} frame from {device} to {}", path.display())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::sim::MemoryBackend;
    use tempfile::TempDir;

    fn store_with(names: &[(&str, Vec<f32>)]) -> TemplateStore<MemoryBackend> {
        let (mut store, _) = TemplateStore::load(MemoryBackend::new());
        for (name, values) in names {
            store.add(name, Descriptor::new(values.clone()), 3).unwrap();
        }
        store
    }

    fn output(command: Commands, store: &mut TemplateStore<MemoryBackend>, as_json: bool) -> String {
        let mut out = Vec::new();
        run(command, store, as_json, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn first_id(store: &TemplateStore<MemoryBackend>) -> String {
        store.list().next().unwrap().id.to_string()
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from(["facegate", "--store", "/tmp/t.json", "match", "d.json", "--threshold", "0.7"]);
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/t.json")));
        assert!(matches!(cli.command, Commands::Match { threshold: Some(t), .. } if t == 0.7));

        let cli = Cli::parse_from(["facegate", "list", "--json"]);
        assert!(cli.json);
        assert!(!cli.command.mutates_store());
    }

    #[test]
    fn test_list_empty_and_populated() {
        let mut store = store_with(&[]);
        assert_eq!(output(Commands::List, &mut store, false), "No identities enrolled\n");

        let mut store = store_with(&[("Ada", vec![1.0, 0.0]), ("Bob", vec![0.0, 1.0])]);
        let text = output(Commands::List, &mut store, false);
        let ada = text.find("Ada").unwrap();
        let bob = text.find("Bob").unwrap();
        assert!(ada < bob);

        let json: serde_json::Value = serde_json::from_str(&output(Commands::List, &mut store, true)).unwrap();
        assert_eq!(json[0]["name"], "Ada");
        assert_eq!(json[1]["sample_count"], 3);
    }

    #[test]
    fn test_show_unknown_id_fails() {
        let mut store = store_with(&[("Ada", vec![1.0])]);
        let mut out = Vec::new();
        let err = run(Commands::Show { id: "nope".into() }, &mut store, false, &mut out).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_rename_and_remove() {
        let mut store = store_with(&[("Ada", vec![1.0])]);
        let id = first_id(&store);

        output(Commands::Rename { id: id.clone(), name: "Ava".into() }, &mut store, false);
        assert_eq!(store.get(&id).unwrap().name, "Ava");

        let mut out = Vec::new();
        assert!(run(
            Commands::Rename { id: id.clone(), name: "Much too long".into() },
            &mut store,
            false,
            &mut out
        )
        .is_err());

        let text = output(Commands::Remove { id: id.clone() }, &mut store, false);
        assert!(text.contains("Ava"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_reset_requires_yes() {
        let mut store = store_with(&[("Ada", vec![1.0]), ("Bob", vec![0.5])]);
        let mut out = Vec::new();
        assert!(run(Commands::Reset { yes: false }, &mut store, false, &mut out).is_err());
        assert_eq!(store.len(), 2);

        let text = output(Commands::Reset { yes: true }, &mut store, false);
        assert_eq!(text, "Removed 2 identities\n");
        assert!(store.is_empty());
    }

    #[test]
    fn test_match_against_descriptor_file() {
        let dir = TempDir::new().unwrap();
        let probe = dir.path().join("probe.json");
        std::fs::write(&probe, r#"{"descriptor": [0.9, 0.1]}"#).unwrap();

        let mut store = store_with(&[("Ada", vec![1.0, 0.0]), ("Bob", vec![0.0, 1.0])]);
        let text = output(
            Commands::Match { descriptor: probe.clone(), threshold: None },
            &mut store,
            false,
        );
        assert!(text.starts_with("Match: Ada"));

        std::fs::write(&probe, "[0.0, -1.0]").unwrap();
        let json: serde_json::Value = serde_json::from_str(&output(
            Commands::Match { descriptor: probe, threshold: Some(0.9) },
            &mut store,
            true,
        ))
        .unwrap();
        assert!(json["match"].is_null());
        assert!(!json["closest"].is_null());
    }

    #[test]
    fn test_match_with_shorter_descriptor_finds_nothing() {
        let dir = TempDir::new().unwrap();
        let probe = dir.path().join("probe.json");
        std::fs::write(&probe, "[1.0]").unwrap();

        let mut store = store_with(&[("Ada", vec![0.5, 10.0])]);
        let text = output(
            Commands::Match { descriptor: probe, threshold: Some(0.1) },
            &mut store,
            false,
        );
        assert_eq!(text.trim_end(), "No match: no enrolled descriptor has length 1");
    }

    #[test]
    fn test_bad_descriptor_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(read_descriptor(&path).is_err());
        std::fs::write(&path, r#"{"other": 1}"#).unwrap();
        assert!(read_descriptor(&path).is_err());
        std::fs::write(&path, r#"{"features": [0.25]}"#).unwrap();
        assert_eq!(read_descriptor(&path).unwrap().values(), &[0.25]);
    }
}
