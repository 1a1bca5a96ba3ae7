//! Simulation parameters.
//!
//! The parameter set is built once at startup from a YAML file, optionally
//! adjusted through a one-time override phase (command-line `key=value`
//! pairs), validated, and then passed around by reference. Nothing mutates
//! it after the simulation has been constructed.

use std::f64::consts::TAU;
use std::fs;

use serde::{Deserialize, Serialize};

use crate::errors::EpidriftError;
use crate::phenotype::{Phenotype, PhenotypeSpace};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Parameters {
    /// Number of days to discard before statistics and tip sampling start.
    pub burnin: u32,

    /// Day at which the simulation ends.
    pub end_day: u32,

    /// Number of days to move forward in a single timestep.
    pub delta_t: f64,

    /// Interval in days between statistic updates and timeseries rows.
    pub print_step: u32,

    /// Tip sampling rate in samples per deme per day.
    pub tip_sampling_rate: f64,

    /// Target number of retained tips per deme during tree reconstruction.
    pub tip_samples_per_deme: usize,

    /// Whether tip sampling is proportional to prevalence.
    pub tip_sampling_proportional: bool,

    /// Proportion of registered tips to use in tree reconstruction.
    pub tree_proportion: f64,

    /// How many infection pairs to draw when estimating diversity,
    /// Ne·τ and the serial interval.
    pub diversity_sampling_count: usize,

    /// Window in days used for the coalescence indicator behind Ne·τ.
    pub netau_window: u32,

    /// Whether to restart the simulation when infections die out before
    /// the end day is reached.
    pub repeat_sim: bool,

    /// Years before the end date excluded from the trunk-versus-side
    /// divergence comparison; recent side branches have not had time to
    /// resolve.
    #[serde(rename = "yearsFromMK")]
    pub years_from_mk: f64,

    /// Whether to write only the summary and timeseries files.
    pub reduced_output: bool,

    /// Whether to write the host checkpoint file at the end of the run.
    pub detailed_output: bool,

    /// Number of initially infected individuals.
    pub initial_i: usize,

    /// Deme where the infection starts, 1-based.
    pub initial_deme: usize,

    /// Probability that a fresh host carries the pre-existing immunity
    /// phenotype in its history.
    #[serde(rename = "initialPrR")]
    pub initial_pr_r: f64,

    /// Contact rate in contacts per individual per day.
    pub beta: f64,

    /// Recovery rate in recoveries per individual per day.
    pub nu: f64,

    /// Between-deme contact rate relative to the within-deme rate.
    pub between_deme_pro: f64,

    /// Culling rate in removals per infected individual per day.
    pub culling: f64,

    /// Vaccination rate in vaccinations per susceptible individual per day.
    pub vaccinate: f64,

    /// Whether recovery grants transcendental immunity (recovered hosts
    /// enter R) instead of returning hosts to the susceptible pool.
    pub transcendental: bool,

    /// Rate of immunity loss in R→S transitions per individual per day.
    pub immunity_loss: f64,

    /// Initial proportion of the population placed in R when transcendental
    /// immunity is enabled.
    #[serde(rename = "initialPrT")]
    pub initial_pr_t: f64,

    /// Whether demography recycles recovered hosts back into susceptibles
    /// instead of drawing births and deaths.
    pub swap_demography: bool,

    /// The antigenic space the simulation runs in.
    pub phenotype_space: PhenotypeSpace,

    /// Phenotype mutation rate in mutations per infected individual per day.
    pub mu_phenotype: f64,

    /// Shape of the cross-immunity curve mapping antigenic distance to
    /// infection risk.
    pub antigenic_shape: f64,

    /// Minimal cross immunity retained against arbitrarily distant
    /// phenotypes.
    pub min_cross_immunity: f64,

    /// Immunity raised against an antigenically identical virus.
    pub homologous_immunity: f64,

    /// First coordinate of the initial virus phenotype.
    pub initial_trait_a: f64,

    /// Mean mutation step size in antigenic units.
    pub mean_step: f64,

    /// Standard deviation of the mutation step size.
    pub sd_step: f64,

    /// Whether mutation directions cover the full circle instead of the
    /// one-dimensional axis.
    #[serde(rename = "mut2D")]
    pub mut_two_dimensional: bool,

    /// Whether the mutation step size is fixed at the mean.
    pub fixed_step: bool,

    /// The demes of the metapopulation.
    pub demes: Vec<DemeParameters>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DemeParameters {
    pub name: String,

    /// Initial number of individuals in this deme.
    #[serde(rename = "initialN")]
    pub initial_n: usize,

    /// Seasonal baseline of the contact rate.
    #[serde(default = "default_baseline")]
    pub baseline: f64,

    /// Seasonal amplitude of the contact rate.
    #[serde(default)]
    pub amplitude: f64,

    /// Seasonal offset relative to the year.
    #[serde(default)]
    pub offset: f64,

    /// The species making up this deme's population.
    pub species: Vec<SpeciesParameters>,

    /// Environmental reservoir parameters; demes without an entry have no
    /// environment-mediated transmission.
    #[serde(default)]
    pub environment: Option<EnvironmentParameters>,
}

fn default_baseline() -> f64 {
    1.0
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesParameters {
    pub name: String,

    /// Fraction of the deme population belonging to this species.
    pub fraction: f64,

    /// Day of year when brooding starts.
    pub brood_start: u32,

    /// Day of year when brooding ends.
    pub brood_end: u32,

    /// Births per individual per day, averaged over the whole year.
    pub birth_rate: f64,

    /// Deaths per individual per day; not modulated by the brood window.
    pub death_rate: f64,
}

impl SpeciesParameters {
    /// Birth rate per individual per day during the brood window, scaled so
    /// the yearly number of births matches `birth_rate`.
    pub fn brood_birth_rate(&self) -> f64 {
        self.birth_rate * 365.0 / (self.brood_end - self.brood_start) as f64
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnvironmentParameters {
    /// Environmental uptake rate per susceptible individual per day.
    #[serde(rename = "envUpTakeRate")]
    pub up_take_rate: f64,

    /// Infective dose at which half of the exposed individuals fall ill;
    /// reservoir entries below it are eligible for eviction.
    pub id50: f64,

    /// Average environmental persistence of shed virus, in days.
    #[serde(rename = "envDurability")]
    pub durability: f64,

    /// Seasonal amplitude modulating the clearance rate.
    #[serde(rename = "seasonalAmp")]
    pub seasonal_amp: f64,

    /// Virions shed into the environment per infected host per day.
    #[serde(rename = "sheddingRate")]
    pub shedding_rate: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        let species = SpeciesParameters {
            name: "host".to_string(),
            fraction: 1.0,
            brood_start: 0,
            brood_end: 365,
            birth_rate: 0.000091,
            death_rate: 0.000091,
        };
        let deme = |name: &str, amplitude: f64, offset: f64| DemeParameters {
            name: name.to_string(),
            initial_n: 1_000_000,
            baseline: 1.0,
            amplitude,
            offset,
            species: vec![species.clone()],
            environment: None,
        };
        Self {
            burnin: 0,
            end_day: 5000,
            delta_t: 0.1,
            print_step: 10,
            tip_sampling_rate: 0.0002,
            tip_samples_per_deme: 1000,
            tip_sampling_proportional: true,
            tree_proportion: 0.1,
            diversity_sampling_count: 1000,
            netau_window: 100,
            repeat_sim: true,
            years_from_mk: 1.0,
            reduced_output: false,
            detailed_output: false,
            initial_i: 10,
            initial_deme: 2,
            initial_pr_r: 0.5,
            beta: 0.36,
            nu: 0.2,
            between_deme_pro: 0.0005,
            culling: 0.1,
            vaccinate: 0.1,
            transcendental: false,
            immunity_loss: 0.01,
            initial_pr_t: 0.0,
            swap_demography: true,
            phenotype_space: PhenotypeSpace::Geometric,
            mu_phenotype: 0.005,
            antigenic_shape: 3.0,
            min_cross_immunity: 0.7,
            homologous_immunity: 0.05,
            initial_trait_a: -6.0,
            mean_step: 0.3,
            sd_step: 0.3,
            mut_two_dimensional: false,
            fixed_step: false,
            demes: vec![
                deme("north", 0.1, 0.0),
                deme("tropics", 0.0, 0.0),
                deme("south", 0.1, 0.5),
            ],
        }
    }
}

impl Parameters {
    /// Simulation date in years, measured from the end of the burn-in.
    pub fn date(&self, day: f64) -> f64 {
        (day - self.burnin as f64) / 365.0
    }

    /// Seasonal modulation of the contact rate in the given deme.
    pub fn seasonality(&self, deme: usize, date: f64) -> f64 {
        let record = &self.demes[deme];
        record.baseline + record.amplitude * (TAU * date + TAU * record.offset).cos()
    }

    /// Phenotype of the founding virus.
    pub fn virus_phenotype(&self) -> Phenotype {
        self.phenotype_space.make(self.initial_trait_a, 0.0)
    }

    /// Phenotype representing pre-existing host immunity.
    pub fn host_phenotype(&self) -> Phenotype {
        self.phenotype_space.make(0.0, 0.0)
    }

    /// Number of individuals placed in R at initialization for a deme.
    pub fn initial_recovered(&self, deme: usize) -> usize {
        if self.transcendental {
            (self.demes[deme].initial_n as f64 * self.initial_pr_t) as usize
        } else {
            0
        }
    }

    /// Check the parameter set before the simulation is constructed.
    pub fn validate(&self) -> Result<(), EpidriftError> {
        if self.demes.is_empty() {
            return Err(config_error("at least one deme must be configured"));
        }
        if self.delta_t <= 0.0 {
            return Err(config_error("deltaT must be positive"));
        }
        if !(1..=self.demes.len()).contains(&self.initial_deme) {
            return Err(config_error(format!(
                "initialDeme {} is outside 1..={}",
                self.initial_deme,
                self.demes.len()
            )));
        }
        for probability in [
            self.initial_pr_r,
            self.initial_pr_t,
            self.tree_proportion,
            self.homologous_immunity,
            self.min_cross_immunity,
        ] {
            if !(0.0..=1.0).contains(&probability) {
                return Err(config_error("probabilities must lie in [0, 1]"));
            }
        }
        for record in &self.demes {
            if record.species.is_empty() {
                return Err(config_error(format!(
                    "no species configured for deme `{}`",
                    record.name
                )));
            }
            for species in &record.species {
                if !(0.0..=1.0).contains(&species.fraction) {
                    return Err(config_error(format!(
                        "species `{}` fraction must lie in [0, 1]",
                        species.name
                    )));
                }
                if species.brood_end <= species.brood_start {
                    return Err(config_error(format!(
                        "species `{}` brood window is empty",
                        species.name
                    )));
                }
            }
            if let Some(environment) = &record.environment {
                if environment.durability <= 0.0 {
                    return Err(config_error(format!(
                        "environment durability must be positive in deme `{}`",
                        record.name
                    )));
                }
            }
        }
        let seeded = &self.demes[self.initial_deme - 1];
        if self.initial_i + self.initial_recovered(self.initial_deme - 1) > seeded.initial_n {
            return Err(config_error(format!(
                "initial infections exceed the population of deme `{}`",
                seeded.name
            )));
        }
        Ok(())
    }

    /// Re-set one parameter to a new scalar value.
    ///
    /// Applied between loading and validation; unknown keys are fatal.
    pub fn apply_override(&mut self, key: &str, value: &str) -> Result<(), EpidriftError> {
        match key {
            "recovery" => self.nu = 1.0 / parse_f64(key, value)?,
            "contact" => self.beta = parse_f64(key, value)?,
            "mutation" => self.mu_phenotype = parse_f64(key, value)?,
            "initialI" => self.initial_i = parse_usize(key, value)?,
            "cull" => self.culling = parse_f64(key, value)?,
            "vaccinate" => self.vaccinate = parse_f64(key, value)?,
            "burnin" => self.burnin = parse_usize(key, value)? as u32,
            "meanStep" => self.mean_step = parse_f64(key, value)?,
            "initialNs" => {
                let size = parse_usize(key, value)?;
                for deme in &mut self.demes {
                    deme.initial_n = size;
                }
            }
            "demeAmplitudes" => {
                let amplitude = parse_f64(key, value)?;
                for deme in &mut self.demes {
                    deme.amplitude = amplitude;
                }
            }
            "envUpTakeRate" | "id50" | "envDurability" | "seasonalAmp" | "sheddingRate" => {
                self.apply_environment_override(key, parse_f64(key, value)?)?;
            }
            _ => {
                return Err(config_error(format!("unknown override key `{key}`")));
            }
        }
        log::info!("Parameter {key} overridden to {value}.");
        Ok(())
    }

    fn apply_environment_override(&mut self, key: &str, value: f64) -> Result<(), EpidriftError> {
        let mut applied = false;
        for deme in &mut self.demes {
            if let Some(environment) = &mut deme.environment {
                match key {
                    "envUpTakeRate" => environment.up_take_rate = value,
                    "id50" => environment.id50 = value,
                    "envDurability" => environment.durability = value,
                    "seasonalAmp" => environment.seasonal_amp = value,
                    "sheddingRate" => environment.shedding_rate = value,
                    _ => return Err(config_error(format!("unknown environment key `{key}`"))),
                }
                applied = true;
            }
        }
        if applied {
            Ok(())
        } else {
            Err(config_error(format!(
                "override `{key}` requires at least one deme with an environment"
            )))
        }
    }

    pub fn write(&self, writer: &mut dyn std::io::Write) -> Result<(), EpidriftError> {
        serde_yaml::to_writer(writer, self).map_err(EpidriftError::YamlError)
    }

    pub fn read(reader: &mut dyn std::io::Read) -> Result<Parameters, EpidriftError> {
        serde_yaml::from_reader(reader).map_err(EpidriftError::YamlError)
    }

    pub fn write_to_file(&self, filename: &str) -> Result<(), EpidriftError> {
        let file = fs::File::create(filename)?;
        let mut writer = std::io::BufWriter::new(file);
        self.write(&mut writer)
    }

    pub fn read_from_file(filename: &str) -> Result<Parameters, EpidriftError> {
        let file = fs::File::open(filename)?;
        let mut reader = std::io::BufReader::new(file);
        Self::read(&mut reader)
    }
}

impl std::fmt::Display for Parameters {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut output = vec![];
        self.write(&mut output).map_err(|_| std::fmt::Error)?;
        write!(
            formatter,
            "{}",
            String::from_utf8(output).map_err(|_| std::fmt::Error)?
        )
    }
}

fn config_error(message: impl Into<String>) -> EpidriftError {
    EpidriftError::ConfigError(message.into())
}

fn parse_f64(key: &str, value: &str) -> Result<f64, EpidriftError> {
    value
        .parse()
        .map_err(|_| config_error(format!("override `{key}` expects a number, got `{value}`")))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, EpidriftError> {
    value
        .parse()
        .map_err(|_| config_error(format!("override `{key}` expects a count, got `{value}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write() {
        let mut buffer = Vec::new();
        let params = Parameters::default();
        params.write(&mut buffer).unwrap();
        let read_params = Parameters::read(&mut buffer.as_slice()).unwrap();
        assert_eq!(read_params, params);
    }

    #[test]
    fn read_write_file() {
        let tmp_path = std::env::temp_dir().join("epidrift_test_parameters.yml");
        let path = tmp_path.to_str().unwrap();
        let params = Parameters::default();
        params.write_to_file(path).unwrap();
        let read_params = Parameters::read_from_file(path).unwrap();
        assert_eq!(read_params, params);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn validation_rejects_broken_configs() {
        let mut params = Parameters::default();
        params.demes.clear();
        assert!(params.validate().is_err());

        let mut params = Parameters::default();
        params.demes[0].species.clear();
        assert!(params.validate().is_err());

        let mut params = Parameters::default();
        params.initial_deme = 7;
        assert!(params.validate().is_err());

        let mut params = Parameters::default();
        params.delta_t = 0.0;
        assert!(params.validate().is_err());

        assert!(Parameters::default().validate().is_ok());
    }

    #[test]
    fn overrides_apply_and_reject_unknown_keys() {
        let mut params = Parameters::default();
        params.apply_override("recovery", "5").unwrap();
        assert!((params.nu - 0.2).abs() < 1e-12);
        params.apply_override("initialI", "25").unwrap();
        assert_eq!(params.initial_i, 25);
        params.apply_override("initialNs", "1000").unwrap();
        assert!(params.demes.iter().all(|d| d.initial_n == 1000));
        assert!(params.apply_override("nonsense", "1").is_err());
        assert!(params.apply_override("id50", "100").is_err());
    }

    #[test]
    fn seasonality_peaks_at_offset() {
        let params = Parameters::default();
        let peak = params.seasonality(0, 0.0);
        let trough = params.seasonality(0, 0.5);
        assert!(peak > trough);
    }
}
