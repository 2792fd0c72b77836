//! Input discovery and output path mirroring.

use std::path::{Component, Path, PathBuf};

use crate::{ConvertError, Result, ONNX_EXTENSION};

/// One file to convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Expand `input` into conversion jobs.
///
/// A file maps to `output` as given. A directory maps every `**/*.onnx`
/// below it to `output/<relative path>` with the extension replaced by
/// `extension`. No matches is an empty job list.
pub fn discover(input: &Path, output: &Path, extension: &str) -> Result<Vec<Job>> {
    if !input.exists() {
        return Err(ConvertError::MissingInput(input.to_path_buf()));
    }
    if input.is_file() {
        return Ok(vec![Job {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
        }]);
    }
    if !input.is_dir() {
        return Err(ConvertError::UnsupportedInput(input.to_path_buf()));
    }

    // glob drops `.` components from what it yields, so match against a root without them
    let root = without_cur_dir(input);
    let root_str = root.to_str().ok_or_else(|| ConvertError::UnsupportedInput(input.to_path_buf()))?;
    let pattern = if root_str.is_empty() {
        format!("**/*.{ONNX_EXTENSION}")
    } else {
        format!("{}/**/*.{ONNX_EXTENSION}", glob::Pattern::escape(root_str))
    };

    let mut jobs = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = entry?;
        if !path.is_file() {
            continue;
        }
        let matched = without_cur_dir(&path);
        let relative = matched.strip_prefix(&root).map_err(|_| ConvertError::OutsideRoot {
            path: path.clone(),
            root: input.to_path_buf(),
        })?;
        jobs.push(Job {
            output: output.join(relative).with_extension(extension),
            input: path,
        });
    }
    jobs.sort_by(|a, b| a.input.cmp(&b.input));
    tracing::debug!(dir = %input.display(), matches = jobs.len(), "discovered inputs");
    Ok(jobs)
}

fn without_cur_dir(path: &Path) -> PathBuf {
    path.components().filter(|c| !matches!(c, Component::CurDir)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(&dir.path().join("nope"), dir.path(), "tqf");
        assert!(matches!(err, Err(ConvertError::MissingInput(_))));
    }

    #[test]
    fn test_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("m.onnx");
        fs::write(&file, b"").unwrap();
        let out = dir.path().join("out.bin");
        let jobs = discover(&file, &out, "tqf").unwrap();
        assert_eq!(jobs, vec![Job { input: file, output: out }]);
    }

    #[test]
    fn test_directory_mirrors_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("top.onnx"), b"").unwrap();
        fs::write(src.join("a/b/deep.onnx"), b"").unwrap();
        fs::write(src.join("a/readme.txt"), b"").unwrap();
        fs::write(src.join("a/b/weights.bin"), b"").unwrap();

        let out = dir.path().join("out");
        let jobs = discover(&src, &out, "tqf").unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].input, src.join("a/b/deep.onnx"));
        assert_eq!(jobs[0].output, out.join("a/b/deep.tqf"));
        assert_eq!(jobs[1].output, out.join("top.tqf"));
    }

    #[test]
    fn test_dot_prefixed_root() {
        // relative to the crate directory, which is the test working directory
        let dir = tempfile::tempdir_in(".").unwrap();
        assert!(dir.path().starts_with("."));
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("a")).unwrap();
        fs::write(src.join("a/m.onnx"), b"").unwrap();

        let out = Path::new("out");
        let jobs = discover(&src, out, "tqf").unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].output, out.join("a/m.tqf"));
        assert!(jobs[0].input.is_file());
    }

    #[test]
    fn test_strip_cur_dir() {
        assert_eq!(without_cur_dir(Path::new("./src/./a")), PathBuf::from("src/a"));
        assert_eq!(without_cur_dir(Path::new(".")), PathBuf::new());
        assert_eq!(without_cur_dir(Path::new("/data/x")), PathBuf::from("/data/x"));
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.md"), b"").unwrap();
        assert!(discover(dir.path(), &dir.path().join("out"), "tqf").unwrap().is_empty());
    }
}
