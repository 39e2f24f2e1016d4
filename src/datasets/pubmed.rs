use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use candle_core::Device;
use regex::Regex;
use tracing::{info, warn};

use super::citation::{CitationDataset, PlanetoidSplit};
use super::utils::{download_and_extract, CompressionFormat};
use crate::error::{GcnError, Result};
use crate::graph::Graph;

/// Pubmed-Diabetes: 19717 papers, 500 TF-IDF features, 3 classes.
pub struct PubMed;

impl PubMed {
    const URL: &'static str =
        "https://linqs-data.soe.ucsc.edu/public/datasets/pubmed-diabetes/pubmed-diabetes.tar.gz";

    pub fn load<P: AsRef<Path>>(root: P, device: &Device) -> Result<CitationDataset> {
        let raw = root.as_ref().join("raw");
        let data = raw.join("pubmed-diabetes/data");
        let nodes = data.join("Pubmed-Diabetes.NODE.paper.tab");
        let cites = data.join("Pubmed-Diabetes.DIRECTED.cites.tab");
        if !nodes.exists() || !cites.exists() {
            std::fs::create_dir_all(&raw)?;
            download_and_extract(Self::URL, &raw, CompressionFormat::Tgz)?;
        }
        Self::parse(
            BufReader::new(File::open(nodes)?),
            BufReader::new(File::open(cites)?),
            &PlanetoidSplit::default(),
            device,
        )
    }

    pub fn parse<N: BufRead, E: BufRead>(
        nodes: N,
        cites: E,
        split: &PlanetoidSplit,
        device: &Device,
    ) -> Result<CitationDataset> {
        let missing = |what: &str| GcnError::dataset(format!("pubmed: missing {what}"));
        let mut lines = nodes.lines();
        lines.next().ok_or_else(|| missing("header 1"))??;
        let header = lines.next().ok_or_else(|| missing("header 2"))??;

        let numeric = Regex::new(r"numeric:([^:]+):").map_err(|e| GcnError::dataset(e.to_string()))?;
        let feature_idx: HashMap<String, usize> = header
            .split('\t')
            .filter_map(|entry| numeric.captures(entry))
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_owned()))
            .enumerate()
            .map(|(i, key)| (key, i))
            .collect();
        let num_features = feature_idx.len();
        if num_features == 0 {
            return Err(missing("feature declarations"));
        }

        let entry = Regex::new(r"^([^\s=]+)=([\d.eE+-]+)$").map_err(|e| GcnError::dataset(e.to_string()))?;
        let mut ids: HashMap<String, u32> = HashMap::new();
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for line in lines {
            let line = line?;
            let mut fields = line.split('\t');
            let Some(id) = fields.next().filter(|id| !id.is_empty()) else {
                continue;
            };
            let mut row = vec![0f32; num_features];
            let mut label = None;
            for field in fields {
                let Some(c) = entry.captures(field) else {
                    continue;
                };
                let (key, value) = (&c[1], &c[2]);
                if key == "label" {
                    // labels are 1-based
                    let l: u32 = value
                        .parse()
                        .map_err(|_| GcnError::dataset(format!("pubmed: bad label {value:?}")))?;
                    label = l.checked_sub(1);
                } else if let Some(&i) = feature_idx.get(key) {
                    row[i] = value
                        .parse()
                        .map_err(|_| GcnError::dataset(format!("pubmed: bad value {value:?}")))?;
                }
            }
            let label = label.ok_or_else(|| GcnError::dataset(format!("pubmed: paper {id} has no label")))?;
            let node = ids.len() as u32;
            if ids.insert(id.to_owned(), node).is_some() {
                return Err(GcnError::dataset(format!("pubmed: duplicate paper id {id}")));
            }
            features.extend(row);
            labels.push(label);
        }

        let edge = Regex::new(r"\d+\s+paper:(\d+)\s*\|\s*paper:(\d+)").map_err(|e| GcnError::dataset(e.to_string()))?;
        let mut src = Vec::new();
        let mut dst = Vec::new();
        let mut skipped = 0usize;
        for line in cites.lines() {
            let line = line?;
            let Some(c) = edge.captures(&line) else {
                continue;
            };
            match (ids.get(&c[1]), ids.get(&c[2])) {
                (Some(&u), Some(&v)) => {
                    src.push(u);
                    dst.push(v);
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(dataset = "pubmed", skipped, "citations to unknown papers were dropped");
        }

        let num_classes = labels.iter().max().map_or(0, |&l| l as usize + 1);
        let graph = Graph::new(ids.len(), &src, &dst, device)?.to_undirected()?;
        info!(
            dataset = "pubmed",
            num_nodes = graph.num_nodes(),
            num_edges = graph.num_edges(),
            num_features,
            num_classes,
            "loaded"
        );
        CitationDataset::from_parts(
            "pubmed",
            features,
            num_features,
            labels,
            num_classes,
            graph,
            split,
            device,
        )
    }
}
