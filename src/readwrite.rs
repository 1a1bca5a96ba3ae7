//! Output sinks for the simulation driver.
//!
//! The core exposes pull accessors only; everything that formats or writes
//! lives here. File layout follows the classic output set: a tab-separated
//! timeseries, a run summary, tip and branch tables and a Newick tree for
//! the reconstructed genealogy, and an optional host checkpoint.

use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::ancestry::{Ancestry, VirusId};
use crate::errors::EpidriftError;
use crate::simulation::Simulation;

/// Tab-separated per-print-step timeseries of the global and per-deme
/// state.
pub struct TimeseriesWriter {
    writer: csv::Writer<fs::File>,
}

impl TimeseriesWriter {
    pub fn create(path: &Path, simulation: &Simulation) -> Result<Self, EpidriftError> {
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;

        let mut header: Vec<String> = [
            "date",
            "diversity",
            "tmrca",
            "netau",
            "serialInterval",
            "antigenicDiversity",
            "totalN",
            "totalS",
            "totalI",
            "totalR",
            "totalCases",
        ]
        .iter()
        .map(|column| column.to_string())
        .collect();
        for deme in simulation.demes() {
            let name = deme.name();
            for column in [
                "Diversity",
                "Tmrca",
                "Netau",
                "SerialInterval",
                "AntigenicDiversity",
                "N",
                "S",
                "I",
                "R",
                "Cases",
            ] {
                header.push(format!("{name}{column}"));
            }
        }
        writer.write_record(&header)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    pub fn append(&mut self, simulation: &Simulation) -> Result<(), EpidriftError> {
        let stats = simulation.stats();
        let mut record: Vec<String> = vec![
            format!("{:.4}", simulation.date()),
            format!("{:.4}", stats.diversity),
            format!("{:.4}", stats.tmrca),
            format!("{:.4}", stats.netau),
            format!("{:.5}", stats.serial_interval),
            format!("{:.4}", stats.antigenic_diversity),
            simulation.total_count().to_string(),
            simulation.susceptible_count().to_string(),
            simulation.infected_count().to_string(),
            simulation.recovered_count().to_string(),
            simulation.cases().to_string(),
        ];
        for deme in simulation.demes() {
            let stats = deme.stats();
            record.push(format!("{:.4}", stats.diversity));
            record.push(format!("{:.4}", stats.tmrca));
            record.push(format!("{:.4}", stats.netau));
            record.push(format!("{:.5}", stats.serial_interval));
            record.push(format!("{:.4}", stats.antigenic_diversity));
            record.push(deme.total_count().to_string());
            record.push(deme.susceptible_count().to_string());
            record.push(deme.infected_count().to_string());
            record.push(deme.recovered_count().to_string());
            record.push(deme.cases().to_string());
        }
        self.writer.write_record(&record)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Write the end-of-run summary as `parameter\tvalue` lines.
pub fn write_summary(path: &Path, entries: &[(&str, f64)]) -> Result<(), EpidriftError> {
    let mut file = BufWriter::new(fs::File::create(path)?);
    writeln!(file, "parameter\tfull")?;
    for (name, value) in entries {
        writeln!(file, "{name}\t{value:.4}")?;
    }
    Ok(())
}

/// Write the retained tips of the reconstructed tree.
pub fn write_tips(path: &Path, ancestry: &Ancestry) -> Result<(), EpidriftError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["name", "deme", "birth", "layout", "trunk", "phenotype"])?;
    for &tip in ancestry.tips() {
        let node = ancestry.get(tip);
        writer.write_record(&[
            ancestry.display_id(tip),
            node.deme().to_string(),
            format!("{:.4}", node.birth()),
            format!("{:.4}", node.layout()),
            (node.is_trunk() as u8).to_string(),
            node.phenotype().to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write every branch of the reconstructed tree as a child/parent pair.
pub fn write_branches(path: &Path, ancestry: &Ancestry) -> Result<(), EpidriftError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["name", "birth", "parentName", "parentBirth", "trunk"])?;
    for id in ancestry.reconstructed_nodes() {
        let node = ancestry.get(id);
        let Some(parent) = node.parent() else {
            continue;
        };
        writer.write_record(&[
            ancestry.display_id(id),
            format!("{:.4}", node.birth()),
            ancestry.display_id(parent),
            format!("{:.4}", ancestry.get(parent).birth()),
            (node.is_trunk() as u8).to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Serialize the reconstructed tree as Newick with branch lengths from
/// birth-time deltas.
pub fn write_newick(path: &Path, ancestry: &Ancestry) -> Result<(), EpidriftError> {
    let mut out = String::new();
    if let Some(root) = ancestry.root() {
        newick_node(ancestry, root, None, &mut out);
    }
    out.push_str(";\n");
    fs::write(path, out)?;
    Ok(())
}

fn newick_node(ancestry: &Ancestry, id: VirusId, parent_birth: Option<f64>, out: &mut String) {
    let node = ancestry.get(id);
    if !node.children().is_empty() {
        out.push('(');
        for (index, &child) in node.children().iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            newick_node(ancestry, child, Some(node.birth()), out);
        }
        out.push(')');
    }
    out.push_str(&ancestry.display_id(id));
    if let Some(parent_birth) = parent_birth {
        out.push_str(&format!(":{:.6}", node.birth() - parent_birth));
    }
}

/// Write one checkpoint line per host across all demes.
pub fn write_host_checkpoint(path: &Path, simulation: &Simulation) -> Result<(), EpidriftError> {
    let mut file = BufWriter::new(fs::File::create(path)?);
    for deme in simulation.demes() {
        for host in deme.hosts() {
            writeln!(
                file,
                "{}",
                host.checkpoint_line(deme.deme_index(), simulation.ancestry())
            )?;
        }
    }
    Ok(())
}

/// Import a host checkpoint file, returning the number of restored hosts.
pub fn import_host_checkpoint(
    path: &Path,
    simulation: &mut Simulation,
) -> Result<usize, EpidriftError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut restored = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        simulation.restore_host_line(&line)?;
        restored += 1;
    }
    Ok(restored)
}
