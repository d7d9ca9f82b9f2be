use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use tar::{EntryType, Header};

#[derive(Debug, Clone)]
enum Entry {
    File { path: String, data: Vec<u8> },
    Raw { path: String, data: Vec<u8> },
    Symlink { path: String, target: String },
}

/// Builds tar and tar.gz upload bodies in memory
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    root: Option<String>,
    entries: Vec<Entry>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place every entry under one top-level directory
    pub fn root_dir(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Write `insights_archive_metadata.json` naming the cluster
    pub fn cluster(self, cluster_id: &str) -> Self {
        self.json(
            "insights_archive_metadata.json",
            &json!({"cluster_id": cluster_id, "gathered_at": "2026-01-15T08:30:00Z"}),
        )
    }

    pub fn file(mut self, path: impl Into<String>, data: Vec<u8>) -> Self {
        self.entries.push(Entry::File {
            path: path.into(),
            data,
        });
        self
    }

    pub fn text(self, path: impl Into<String>, text: &str) -> Self {
        self.file(path, text.as_bytes().to_vec())
    }

    pub fn json(self, path: impl Into<String>, value: &Value) -> Self {
        self.file(path, value.to_string().into_bytes())
    }

    /// Remove a previously added file
    pub fn without(mut self, path: &str) -> Self {
        self.entries.retain(|e| match e {
            Entry::File { path: p, .. } | Entry::Raw { path: p, .. } | Entry::Symlink { path: p, .. } => {
                p != path
            }
        });
        self
    }

    /// Entry whose name is written verbatim, bypassing path validation
    pub fn raw_entry(mut self, path: impl Into<String>, data: Vec<u8>) -> Self {
        self.entries.push(Entry::Raw {
            path: path.into(),
            data,
        });
        self
    }

    pub fn symlink(mut self, path: impl Into<String>, target: impl Into<String>) -> Self {
        self.entries.push(Entry::Symlink {
            path: path.into(),
            target: target.into(),
        });
        self
    }

    fn full_path(&self, path: &str) -> String {
        match &self.root {
            Some(root) => format!("{root}/{path}"),
            None => path.to_string(),
        }
    }

    pub fn build_tar(&self) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for entry in &self.entries {
            match entry {
                Entry::File { path, data } => {
                    let mut header = Header::new_gnu();
                    header.set_size(data.len() as u64);
                    header.set_mode(0o644);
                    header.set_entry_type(EntryType::Regular);
                    builder
                        .append_data(&mut header, self.full_path(path), data.as_slice())
                        .unwrap();
                }
                Entry::Raw { path, data } => {
                    let mut header = Header::new_old();
                    let name = self.full_path(path);
                    header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
                    header.set_size(data.len() as u64);
                    header.set_mode(0o644);
                    header.set_entry_type(EntryType::Regular);
                    header.set_cksum();
                    builder.append(&header, data.as_slice()).unwrap();
                }
                Entry::Symlink { path, target } => {
                    let mut header = Header::new_gnu();
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_entry_type(EntryType::Symlink);
                    header.set_link_name(target).unwrap();
                    builder
                        .append_data(&mut header, self.full_path(path), std::io::empty())
                        .unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    pub fn build_tar_gz(&self) -> Vec<u8> {
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.build_tar()).unwrap();
        encoder.finish().unwrap()
    }
}
