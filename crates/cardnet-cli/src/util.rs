//! Reading inputs and writing run artifacts.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Component, Path, PathBuf},
};

use anyhow::Context as _;
use serde::{Serialize, de::DeserializeOwned};

/// Name of the run summary written next to the models.
pub const SUMMARY_FILE: &str = "summary.json";

/// A named destination: a file, or stdout when no path is given.
pub struct Output {
    writer: Box<dyn Write>,
    name: String,
}

impl Output {
    pub fn open(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self {
                writer: Box::new(io::stdout().lock()),
                name: "stdout".to_owned(),
            });
        };
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        Ok(Self {
            writer: Box::new(BufWriter::new(file)),
            name: path.display().to_string(),
        })
    }

    /// Writes `value` as pretty JSON followed by a newline.
    pub fn write_json<T>(&mut self, value: &T) -> anyhow::Result<()>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_writer_pretty(&mut self.writer, value)
            .with_context(|| format!("Failed to write JSON to {}", self.name))?;
        self.write_with(|w| writeln!(w))
    }

    /// Runs `write` against the destination, then flushes it.
    pub fn write_with<F>(&mut self, write: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        write(&mut *self.writer)
            .and_then(|()| self.writer.flush())
            .with_context(|| format!("Failed to write to {}", self.name))
    }
}

pub fn save_json<T>(value: &T, path: Option<&Path>) -> anyhow::Result<()>
where
    T: Serialize + ?Sized,
{
    Output::open(path)?.write_json(value)
}

pub fn read_json_file<T, P>(file_kind: &str, path: P) -> anyhow::Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open {file_kind} file: {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {file_kind} JSON file: {}", path.display()))
}

/// Files written for one category inside a learner folder.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub model: PathBuf,
    pub log: PathBuf,
}

impl Artifacts {
    /// Fails unless `category` is a plain file name, so nothing is written
    /// outside `dir`.
    pub fn new(dir: &Path, category: &str) -> anyhow::Result<Self> {
        let mut components = Path::new(category).components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(name)), None) if name == category
        );
        if !plain {
            anyhow::bail!("Category '{category}' cannot be used as a file name");
        }
        Ok(Self {
            model: dir.join(format!("{category}.json")),
            log: dir.join(format!("{category}.txt")),
        })
    }
}

/// Model files of a learner folder as `(category, path)`, sorted by category.
pub fn model_files(dir: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let context = || format!("Failed to read model directory: {}", dir.display());
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(context)? {
        let path = entry.with_context(context)?.path();
        let is_model = path.extension().is_some_and(|ext| ext == "json")
            && path.file_name().is_some_and(|name| name != SUMMARY_FILE);
        if is_model && let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            files.push((stem.to_owned(), path));
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::{env, process};

    use super::*;

    #[test]
    fn test_model_files_skip_summary_and_logs() {
        let dir = env::temp_dir().join(format!("cardnet-model-files-{}", process::id()));
        fs::create_dir_all(&dir).unwrap();
        for name in ["Village", "Moat"] {
            let artifacts = Artifacts::new(&dir, name).unwrap();
            save_json(&[1.0], Some(&artifacts.model)).unwrap();
            fs::write(&artifacts.log, "log").unwrap();
        }
        save_json(&[0.0], Some(&dir.join(SUMMARY_FILE))).unwrap();

        let files = model_files(&dir).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        let categories = files.iter().map(|(c, _)| c.as_str()).collect::<Vec<_>>();
        assert_eq!(categories, ["Moat", "Village"]);
        assert_eq!(files[0].1.file_name().unwrap(), "Moat.json");
    }

    #[test]
    fn test_artifacts_stay_inside_the_folder() {
        let dir = Path::new("out/Backprop");
        let artifacts = Artifacts::new(dir, "Throne Room").unwrap();
        assert_eq!(artifacts.model, dir.join("Throne Room.json"));
        assert_eq!(artifacts.log, dir.join("Throne Room.txt"));

        for name in ["../Village", "a/b", "/etc/passwd", "..", ".", "", "Moat/"] {
            assert!(Artifacts::new(dir, name).is_err(), "{name:?} was accepted");
        }
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let path = env::temp_dir().join(format!("cardnet-json-{}.json", process::id()));
        save_json(&vec![("a".to_owned(), 1.5)], Some(&path)).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let value: Vec<(String, f64)> = read_json_file("test", &path).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(text.ends_with("]\n"));
        assert_eq!(value, vec![("a".to_owned(), 1.5)]);
    }
}
