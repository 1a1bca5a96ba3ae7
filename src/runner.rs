//! Simulation driver.
//!
//! Owns the print cadence, the repeat-run restart policy, the end-of-run
//! genealogy reconstruction and every file the run produces. The core
//! simulation never writes anything itself.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::args::Args;
use crate::config::Parameters;
use crate::readwrite::{self, TimeseriesWriter};
use crate::simulation::Simulation;

pub struct Runner {
    args: Args,
    simulation: Simulation,
    means: RunningMeans,
}

impl Runner {
    pub fn new(args: Args) -> Result<Runner> {
        Self::setup_logger(&args);

        let mut params = Self::load_parameters(&args.parameters)?;
        for entry in &args.set {
            let Some((key, value)) = entry.split_once('=') else {
                anyhow::bail!("override `{entry}` is not of the form key=value");
            };
            params.apply_override(key, value)?;
        }
        log::info!("Loaded parameters\n{}", params);

        let seed = args.seed.unwrap_or_else(rand::random);
        log::info!("Seeding random number generator with {seed}.");

        let mut simulation = Simulation::new(params, seed)?;
        if let Some(hosts) = &args.hosts {
            let restored = readwrite::import_host_checkpoint(Path::new(hosts), &mut simulation)?;
            log::info!("Restored {restored} hosts from {hosts}.");
        }

        std::fs::create_dir_all(&args.outdir)?;

        Ok(Self {
            args,
            simulation,
            means: RunningMeans::default(),
        })
    }

    pub fn start(&mut self) -> Result<()> {
        let start = Instant::now();
        self.run()?;
        self.finish()?;
        log::info!("Elapsed time: {:.2} seconds.", start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Setup logging level and file.
    fn setup_logger(args: &Args) {
        let log_level = match args.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        simple_logging::log_to_file(args.log_file.as_str(), log_level).unwrap_or_else(|_| {
            eprintln!("Unable to open log file.");
            std::process::exit(1);
        });
    }

    /// Load parameters from file. A missing file falls back to the
    /// built-in defaults; a malformed one is fatal.
    fn load_parameters(path: &str) -> Result<Parameters> {
        if !Path::new(path).exists() {
            log::warn!("Cannot load {path}, using defaults.");
            println!("Cannot load {path}, using defaults.");
            return Ok(Parameters::default());
        }
        Ok(Parameters::read_from_file(path)?)
    }

    fn run(&mut self) -> Result<()> {
        let params = self.simulation.params().clone();
        let outdir = PathBuf::from(&self.args.outdir);
        let mut series = TimeseriesWriter::create(&outdir.join("out.timeseries"), &self.simulation)?;

        let bar = match self.args.disable_progress_bar {
            true => None,
            false => {
                let bar = ProgressBar::new(params.end_day as u64);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template(
                            "[{bar:40}] {pos:>7}/{len:7} [{elapsed_precise} / {duration_precise}] {msg}",
                        )
                        .expect("Unable to create template.")
                        .progress_chars("=> "),
                );
                Some(bar)
            }
        };

        while self.simulation.day() < params.end_day as f64 {
            let day = self.simulation.day();

            if day % (params.print_step as f64) < params.delta_t {
                self.simulation.update_diversity();
                let stats = self.simulation.stats();
                log::info!(
                    "day={day:.1} diversity={:.4} tmrca={:.4} netau={:.4} I={}",
                    stats.diversity,
                    stats.tmrca,
                    stats.netau,
                    self.simulation.infected_count()
                );
                if day >= params.burnin as f64 {
                    series.append(&self.simulation)?;
                    self.means.push(&self.simulation);
                }
                self.simulation.reset_cases();

                if let Some(bar) = bar.as_ref() {
                    bar.set_position(day as u64);
                    bar.set_message(format!("I={}", self.simulation.infected_count()));
                }
            }

            if self.simulation.extinct() {
                if params.repeat_sim && params.initial_i > 0 {
                    log::info!("Infections extinct at day {day:.1}, restarting simulation.");
                    self.simulation.reset();
                    self.means.clear();
                    series =
                        TimeseriesWriter::create(&outdir.join("out.timeseries"), &self.simulation)?;
                    continue;
                }
                log::info!("Infections extinct at day {day:.1}, ending simulation.");
                break;
            }

            self.simulation.step_forward();
        }

        if let Some(bar) = bar {
            bar.finish_with_message("Done.");
        }
        log::info!("Finished simulation.");
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let params = self.simulation.params().clone();
        let outdir = PathBuf::from(&self.args.outdir);

        log::info!(
            "Reconstructing genealogy from {} tips...",
            self.simulation.ancestry().tips().len()
        );
        let root = self.simulation.reconstruct_genealogy();
        let tree = match root {
            Some(_) => Some(self.simulation.tree_summary()),
            None => {
                log::info!("Too few retained tips, skipping tree output.");
                None
            }
        };

        let mut entries = vec![
            ("endDate", self.simulation.date()),
            ("diversity", mean(&self.means.diversity)),
            ("tmrca", mean(&self.means.tmrca)),
            ("netau", mean(&self.means.netau)),
            ("serialInterval", mean(&self.means.serial_interval)),
            ("antigenicDiversity", mean(&self.means.antigenic_diversity)),
            ("N", mean(&self.means.total)),
            ("S", mean(&self.means.susceptible)),
            ("I", mean(&self.means.infected)),
            ("R", mean(&self.means.recovered)),
            ("cases", mean(&self.means.cases)),
        ];
        if let Some(tree) = &tree {
            entries.push(("divergenceRatio", tree.divergence_ratio));
        }
        readwrite::write_summary(&outdir.join("out.summary"), &entries)?;

        if !params.reduced_output && root.is_some() {
            readwrite::write_tips(&outdir.join("out.tips"), self.simulation.ancestry())?;
            readwrite::write_branches(&outdir.join("out.branches"), self.simulation.ancestry())?;
            readwrite::write_newick(&outdir.join("out.trees"), self.simulation.ancestry())?;
        }
        if params.detailed_output {
            readwrite::write_host_checkpoint(&outdir.join("out.hosts"), &self.simulation)?;
        }
        Ok(())
    }
}

/// Per-print-interval accumulators behind the end-of-run summary means.
#[derive(Default)]
struct RunningMeans {
    diversity: Vec<f64>,
    tmrca: Vec<f64>,
    netau: Vec<f64>,
    serial_interval: Vec<f64>,
    antigenic_diversity: Vec<f64>,
    total: Vec<f64>,
    susceptible: Vec<f64>,
    infected: Vec<f64>,
    recovered: Vec<f64>,
    cases: Vec<f64>,
}

impl RunningMeans {
    fn push(&mut self, simulation: &Simulation) {
        let stats = simulation.stats();
        self.diversity.push(stats.diversity);
        self.tmrca.push(stats.tmrca);
        self.netau.push(stats.netau);
        self.serial_interval.push(stats.serial_interval);
        self.antigenic_diversity.push(stats.antigenic_diversity);
        self.total.push(simulation.total_count() as f64);
        self.susceptible.push(simulation.susceptible_count() as f64);
        self.infected.push(simulation.infected_count() as f64);
        self.recovered.push(simulation.recovered_count() as f64);
        self.cases.push(simulation.cases() as f64);
    }

    fn clear(&mut self) {
        *self = RunningMeans::default();
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
