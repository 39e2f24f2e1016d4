//! Raw citation graphs from the LINQS group (`<name>.content` / `<name>.cites`).
//!
//! `.content`: `<paper id> <binary word attributes>+ <class label>`
//! `.cites`: `<cited paper id> <citing paper id>`

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use candle_core::Device;
use itertools::Itertools;
use tracing::{info, warn};

use super::citation::{row_normalize, CitationDataset, PlanetoidSplit};
use super::utils::{download_and_extract, CompressionFormat};
use crate::error::{GcnError, Result};
use crate::graph::Graph;

pub struct Linqs;

impl Linqs {
    pub fn cora<P: AsRef<Path>>(root: P, device: &Device) -> Result<CitationDataset> {
        Self::fetch(
            root.as_ref(),
            "cora",
            "https://linqs-data.soe.ucsc.edu/public/lbc/cora.tgz",
            CompressionFormat::Tgz,
            device,
        )
    }
    pub fn citeseer<P: AsRef<Path>>(root: P, device: &Device) -> Result<CitationDataset> {
        Self::fetch(
            root.as_ref(),
            "citeseer",
            "https://linqs-data.soe.ucsc.edu/public/lbc/citeseer.zip",
            CompressionFormat::Zip,
            device,
        )
    }

    fn fetch(
        root: &Path,
        name: &str,
        url: &str,
        format: CompressionFormat,
        device: &Device,
    ) -> Result<CitationDataset> {
        let raw = root.join("raw");
        let dir = raw.join(name);
        let content = dir.join(format!("{name}.content"));
        let cites = dir.join(format!("{name}.cites"));
        if !content.exists() || !cites.exists() {
            std::fs::create_dir_all(&raw)?;
            download_and_extract(url, &raw, format)?;
        }
        Self::load(
            name,
            BufReader::new(File::open(content)?),
            BufReader::new(File::open(cites)?),
            &PlanetoidSplit::default(),
            device,
        )
    }

    /// Parses already-opened `.content` and `.cites` streams.
    pub fn load<C: BufRead, E: BufRead>(
        name: &str,
        content: C,
        cites: E,
        split: &PlanetoidSplit,
        device: &Device,
    ) -> Result<CitationDataset> {
        let mut ids: HashMap<String, u32> = HashMap::new();
        let mut features = Vec::new();
        let mut class_names = Vec::new();
        let mut num_features = None;

        for (line_no, line) in content.lines().enumerate() {
            let line = line?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() < 3 {
                return Err(GcnError::dataset(format!(
                    "{name}.content:{}: expected id, features and label",
                    line_no + 1
                )));
            }
            let width = fields.len() - 2;
            if *num_features.get_or_insert(width) != width {
                return Err(GcnError::dataset(format!(
                    "{name}.content:{}: {width} features, expected {}",
                    line_no + 1,
                    num_features.unwrap_or_default()
                )));
            }
            for x in &fields[1..=width] {
                features.push(x.parse::<f32>().map_err(|e| {
                    GcnError::dataset(format!("{name}.content:{}: {e}", line_no + 1))
                })?);
            }
            let node = ids.len() as u32;
            if ids.insert(fields[0].to_owned(), node).is_some() {
                return Err(GcnError::dataset(format!(
                    "{name}.content:{}: duplicate paper id {}",
                    line_no + 1,
                    fields[0]
                )));
            }
            class_names.push(fields[width + 1].to_owned());
        }
        let num_features =
            num_features.ok_or_else(|| GcnError::dataset(format!("{name}.content is empty")))?;
        row_normalize(&mut features, num_features);

        let classes: HashMap<&str, u32> = class_names
            .iter()
            .map(String::as_str)
            .sorted()
            .dedup()
            .enumerate()
            .map(|(i, c)| (c, i as u32))
            .collect();
        let labels: Vec<u32> = class_names.iter().map(|c| classes[c.as_str()]).collect();

        let mut src = Vec::new();
        let mut dst = Vec::new();
        let mut skipped = 0usize;
        for line in cites.lines() {
            let line = line?;
            let Some((cited, citing)) = line.split_whitespace().collect_tuple() else {
                continue;
            };
            match (ids.get(citing), ids.get(cited)) {
                (Some(&u), Some(&v)) => {
                    src.push(u);
                    dst.push(v);
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(dataset = name, skipped, "citations to unknown papers were dropped");
        }

        let graph = Graph::new(ids.len(), &src, &dst, device)?.to_undirected()?;
        info!(
            dataset = name,
            num_nodes = graph.num_nodes(),
            num_edges = graph.num_edges(),
            num_features,
            num_classes = classes.len(),
            "loaded"
        );
        CitationDataset::from_parts(
            name,
            features,
            num_features,
            labels,
            classes.len(),
            graph,
            split,
            device,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT: &str = "\
p1 1 0 1 Theory
p2 0 1 0 AI
p3 1 1 0 Theory
p4 0 0 1 ML
";
    const CITES: &str = "\
p1 p2
p2 p3
p1 p3
p9 p1
p3 p4
";

    fn split() -> PlanetoidSplit {
        PlanetoidSplit {
            per_class: 1,
            num_val: 1,
            num_test: 1,
        }
    }

    #[test]
    fn parses_content_and_cites() {
        let ds = Linqs::load(
            "toy",
            CONTENT.as_bytes(),
            CITES.as_bytes(),
            &split(),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(ds.num_nodes(), 4);
        assert_eq!(ds.num_features(), 3);
        assert_eq!(ds.num_classes, 3);
        // AI < ML < Theory
        assert_eq!(ds.labels.to_vec1::<u32>().unwrap(), [2, 0, 2, 1]);
        // 4 known citations, mirrored
        assert_eq!(ds.graph.num_edges(), 8);
        assert_eq!(ds.train_indices.to_vec1::<u32>().unwrap(), [0, 1, 3]);
        assert_eq!(ds.val_indices.to_vec1::<u32>().unwrap(), [2]);

        let x = ds.features.to_vec2::<f32>().unwrap();
        assert_eq!(x[0], [0.5, 0.0, 0.5]);
        assert_eq!(x[1], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let content = "p1 1 0 A\np2 1 B\n";
        assert!(matches!(
            Linqs::load("toy", content.as_bytes(), "".as_bytes(), &split(), &Device::Cpu),
            Err(GcnError::Dataset { .. })
        ));
    }

    #[test]
    fn empty_content() {
        assert!(Linqs::load("toy", "".as_bytes(), "".as_bytes(), &split(), &Device::Cpu).is_err());
    }
}
