//! The Artifact Writer: everything that lands in the run directory —
//! the resolved-config document, one file per response body, the results
//! table, and the run log. File I/O goes through the `FileSystem` trait
//! so tests can assert on writes without touching disk.

use crate::error::Error;
use crate::executor::RequestOutcome;
use crate::fs::FileSystem;
use crate::value::Value;
use std::path::{Path, PathBuf};

pub struct ArtifactWriter<'a> {
    fs: &'a dyn FileSystem,
    run_dir: PathBuf,
}

impl<'a> ArtifactWriter<'a> {
    /// Creates (if missing) `run_dir` and returns a writer scoped to it.
    ///
    /// # Errors
    /// Returns an `OutputWrite` error if the directory cannot be created.
    pub fn new(fs: &'a dyn FileSystem, run_dir: PathBuf) -> Result<Self, Error> {
        fs.create_dir_all(&run_dir)
            .map_err(|e| Error::output_write(format!("failed to create run directory {}: {e}", run_dir.display())))?;
        Ok(Self { fs, run_dir })
    }

    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Writes the resolved document as `<config-basename>-resolved.yml`.
    ///
    /// # Errors
    /// Returns an `OutputWrite` error if serialization or the write fails.
    pub fn write_resolved_document(&self, config_basename: &str, document: &Value) -> Result<PathBuf, Error> {
        let yaml = serde_yaml::to_string(document)?;
        let path = self.run_dir.join(format!("{}-resolved.yml", slug(config_basename)));
        self.write(&path, yaml.as_bytes())?;
        Ok(path)
    }

    /// Writes one response body file per outcome under
    /// `seq<NNN>-<sequence-name>/req<NNN>-<request-key>-response.<ext>`,
    /// NNN being the zero-padded 1-based index. When there is no body (a
    /// network failure that never reached a server), a short diagnostic
    /// text is written instead of an empty file.
    ///
    /// # Errors
    /// Returns an `OutputWrite` error if the directory or file cannot be
    /// written.
    pub fn write_response_body(&self, outcome: &RequestOutcome) -> Result<PathBuf, Error> {
        let ext = extension_for_content_type(outcome.content_type.as_deref(), outcome.status);
        let seq_dir = self
            .run_dir
            .join(format!("seq{:03}-{}", outcome.sequence_index, slug(&outcome.sequence_name)));
        self.fs
            .create_dir_all(&seq_dir)
            .map_err(|e| Error::output_write(format!("failed to create {}: {e}", seq_dir.display())))?;

        let filename = format!("req{:03}-{}-response.{ext}", outcome.request_index, slug(&outcome.request_key));
        let path = seq_dir.join(filename);

        let body: Vec<u8> = if outcome.status.is_none() && outcome.body.is_empty() {
            format!("no response received: {}\n", outcome.error.as_deref().unwrap_or("unknown error")).into_bytes()
        } else {
            outcome.body.clone()
        };
        self.write(&path, &body)?;
        Ok(path)
    }

    /// Writes `<config-basename>-results.csv` with header
    /// `sequence,request,timestamp,status,duration_ms,attempts`, sorted by
    /// `(sequence_index, request_index)` regardless of the order outcomes
    /// completed in. `status` is `-1` when no response was ever received.
    ///
    /// # Errors
    /// Returns an `OutputWrite` error if the write fails.
    pub fn write_results_csv(&self, config_basename: &str, outcomes: &[RequestOutcome]) -> Result<PathBuf, Error> {
        let mut sorted: Vec<&RequestOutcome> = outcomes.iter().collect();
        sorted.sort_by_key(|o| (o.sequence_index, o.request_index));

        let mut csv = String::new();
        csv.push_str("sequence,request,timestamp,status,duration_ms,attempts\n");
        for o in sorted {
            let fields = [
                o.sequence_name.clone(),
                o.request_key.clone(),
                o.started_at.to_rfc3339(),
                o.status.map_or_else(|| "-1".to_string(), |s| s.to_string()),
                o.elapsed.as_millis().to_string(),
                o.attempts.to_string(),
            ];
            csv.push_str(&fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(","));
            csv.push('\n');
        }

        let path = self.run_dir.join(format!("{}-results.csv", slug(config_basename)));
        self.write(&path, csv.as_bytes())?;
        Ok(path)
    }

    /// Writes the run's human-readable log (distinct from the process-wide
    /// `tracing` stream; this is the declarative record of what the engine
    /// did for this run).
    ///
    /// # Errors
    /// Returns an `OutputWrite` error if the write fails.
    pub fn write_log(&self, config_basename: &str, lines: &[String]) -> Result<PathBuf, Error> {
        let content = lines.join("\n") + "\n";
        let path = self.run_dir.join(format!("{}-log.txt", slug(config_basename)));
        self.write(&path, content.as_bytes())?;
        Ok(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), Error> {
        self.fs
            .write_all(path, contents)
            .map_err(|e| Error::output_write(format!("failed to write {}: {e}", path.display())))
    }
}

fn slug(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Maps a `Content-Type` header value onto a file extension for the
/// archived response body. Anything not in the table, a missing
/// Content-Type, or a missing status (no response was ever received)
/// falls back to `txt`.
#[must_use]
pub fn extension_for_content_type(content_type: Option<&str>, status: Option<u16>) -> &'static str {
    if status.is_none() {
        return "txt";
    }
    let Some(ct) = content_type else { return "txt" };
    let base = ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase();
    match base.as_str() {
        "application/json" => "json",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "application/xml" | "text/xml" => "xml",
        "application/pdf" => "pdf",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        _ => "txt",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Method;
    use chrono::Utc;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io;
    use std::time::Duration;

    #[derive(Default)]
    struct MemFs {
        files: RefCell<HashMap<PathBuf, Vec<u8>>>,
    }

    impl FileSystem for MemFs {
        fn read_to_string(&self, path: &Path) -> io::Result<String> {
            self.files
                .borrow()
                .get(path)
                .map(|b| String::from_utf8_lossy(b).to_string())
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }
        fn write_all(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
            self.files.borrow_mut().insert(path.to_path_buf(), contents.to_vec());
            Ok(())
        }
        fn create_dir_all(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }
        fn remove_file(&self, path: &Path) -> io::Result<()> {
            self.files.borrow_mut().remove(path);
            Ok(())
        }
        fn remove_dir_all(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }
        fn exists(&self, path: &Path) -> bool {
            self.files.borrow().contains_key(path)
        }
        fn is_dir(&self, _path: &Path) -> bool {
            false
        }
        fn is_file(&self, path: &Path) -> bool {
            self.files.borrow().contains_key(path)
        }
        fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
            Ok(path.to_path_buf())
        }
        fn read_dir(&self, _path: &Path) -> io::Result<Vec<PathBuf>> {
            Ok(self.files.borrow().keys().cloned().collect())
        }
    }

    fn outcome(seq_idx: usize, req_idx: usize, status: Option<u16>) -> RequestOutcome {
        RequestOutcome {
            sequence_name: "Seq".to_string(),
            sequence_index: seq_idx,
            request_key: format!("R{req_idx}"),
            request_index: req_idx,
            method: Method::Get,
            url: "https://x/y".to_string(),
            started_at: Utc::now(),
            status,
            content_type: Some("application/json".to_string()),
            body: b"{}".to_vec(),
            elapsed: Duration::from_millis(10),
            attempts: 1,
            error: None,
        }
    }

    #[test]
    fn extension_table_covers_common_types() {
        assert_eq!(extension_for_content_type(Some("application/json; charset=utf-8"), Some(200)), "json");
        assert_eq!(extension_for_content_type(Some("text/plain"), Some(200)), "txt");
        assert_eq!(extension_for_content_type(Some("text/csv"), Some(200)), "csv");
        assert_eq!(extension_for_content_type(Some("application/xml"), Some(200)), "xml");
        assert_eq!(extension_for_content_type(Some("text/xml"), Some(200)), "xml");
        assert_eq!(extension_for_content_type(Some("application/pdf"), Some(200)), "pdf");
        assert_eq!(extension_for_content_type(Some("image/png"), Some(200)), "png");
        assert_eq!(extension_for_content_type(Some("image/jpeg"), Some(200)), "jpg");
        assert_eq!(extension_for_content_type(Some("text/html"), Some(200)), "txt");
        assert_eq!(extension_for_content_type(None, Some(200)), "txt");
        assert_eq!(extension_for_content_type(Some("application/weird"), Some(200)), "txt");
        assert_eq!(extension_for_content_type(Some("application/json"), None), "txt");
    }

    #[test]
    fn csv_is_sorted_by_sequence_then_request_regardless_of_input_order() {
        let fs = MemFs::default();
        let writer = ArtifactWriter::new(&fs, PathBuf::from("/run")).unwrap();
        let outcomes = vec![
            outcome(2, 1, Some(200)),
            outcome(1, 2, Some(200)),
            outcome(1, 1, None),
        ];
        let path = writer.write_results_csv("Mini", &outcomes).unwrap();
        let content = fs.read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "sequence,request,timestamp,status,duration_ms,attempts");
        assert!(lines[1].starts_with("Seq,R1,"));
        assert!(lines[1].ends_with(",-1,10,1"));
        assert!(lines[2].starts_with("Seq,R2,"));
        assert!(lines[2].ends_with(",200,10,1"));
        assert!(lines[3].starts_with("Seq,R1,"));
        assert!(lines[3].ends_with(",200,10,1"));
    }

    #[test]
    fn csv_field_quotes_values_containing_commas() {
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("has\"quote"), "\"has\"\"quote\"");
    }

    #[test]
    fn response_body_filename_encodes_authored_order() {
        let fs = MemFs::default();
        let writer = ArtifactWriter::new(&fs, PathBuf::from("/run")).unwrap();
        let path = writer.write_response_body(&outcome(1, 2, Some(200))).unwrap();
        assert_eq!(
            path.strip_prefix("/run").unwrap(),
            Path::new("seq001-Seq/req002-R2-response.json")
        );
    }

    #[test]
    fn response_body_without_status_writes_diagnostic_text() {
        let fs = MemFs::default();
        let writer = ArtifactWriter::new(&fs, PathBuf::from("/run")).unwrap();
        let mut o = outcome(1, 1, None);
        o.body = Vec::new();
        o.error = Some("connection refused".to_string());
        let path = writer.write_response_body(&o).unwrap();
        assert_eq!(path.extension().unwrap(), "txt");
        let content = fs.read_to_string(&path).unwrap();
        assert!(content.contains("connection refused"));
    }

    #[test]
    fn slug_replaces_non_alphanumeric_characters() {
        assert_eq!(slug("My Stash!"), "My-Stash-");
    }
}
