use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the parameter file (YAML).
    #[clap(long, default_value = "parameters.yml")]
    pub parameters: String,

    /// Path to the output directory.
    #[clap(long, short, default_value = "simulation_output")]
    pub outdir: String,

    /// Seed for the random number generator; drawn from entropy when
    /// omitted.
    #[clap(long)]
    pub seed: Option<u64>,

    /// Parameter overrides applied after the file is loaded.
    #[clap(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Path to a host checkpoint file to restore before the run.
    #[clap(long)]
    pub hosts: Option<String>,

    /// Path to the log file.
    #[clap(long, default_value = "epidrift.log")]
    pub log_file: String,

    /// Verbosity level (-v: debug, -vv: trace).
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable the progress bar.
    #[clap(long)]
    pub disable_progress_bar: bool,
}
