use tracing::level_filters::LevelFilter;

/// How much the command-line tools log to stderr. Solver results are
/// printed to stdout regardless.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Nothing at all.
    Silent,
    /// A summary of every solve.
    Normal,
    /// Limits, sweeps and resource usage.
    Verbose,
    /// Everything, down to single short-sighted regions.
    Debug,
}

impl From<Verbosity> for LevelFilter {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Silent => LevelFilter::OFF,
            Verbosity::Normal => LevelFilter::INFO,
            Verbosity::Verbose => LevelFilter::DEBUG,
            Verbosity::Debug => LevelFilter::TRACE,
        }
    }
}
