use std::fmt;
use std::io::Write;

use env_logger::{Builder, Target};
use log::{Level, LevelFilter};

/// Source modules of each area, relative to the crate root.
const MODULES: &[(&str, Area)] = &[
    ("frontend", Area::Frontend),
    ("lexer", Area::Frontend),
    ("parser", Area::Frontend),
    ("typechecker", Area::Frontend),
    ("partition", Area::Partition),
    ("namespace", Area::Partition),
    ("codegen", Area::Codegen),
    ("indirection", Area::Rewrite),
    ("engine", Area::Jit),
    ("session", Area::Jit),
    ("repl", Area::Jit),
];

/// Pipeline stage a log record belongs to, derived from its target module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Area {
    Frontend,
    Partition,
    Codegen,
    Rewrite,
    Jit,
    All,
}

impl Area {
    /// Area of a record target such as `splice::typechecker`.
    pub fn of_target(target: &str) -> Option<Area> {
        let module = target.strip_prefix("splice::")?;
        let module = module.split("::").next().unwrap_or(module);
        MODULES
            .iter()
            .find(|(name, _)| *name == module)
            .map(|(_, area)| *area)
    }

    fn includes(self, other: Area) -> bool {
        self == Area::All || self == other
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Area::Frontend => "frontend",
            Area::Partition => "partition",
            Area::Codegen => "codegen",
            Area::Rewrite => "rewrite",
            Area::Jit => "jit",
            Area::All => "all",
        };
        f.write_str(name)
    }
}

/// Minimum severity printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Priority {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    #[default]
    None,
}

impl Priority {
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Priority::Trace => LevelFilter::Trace,
            Priority::Debug => LevelFilter::Debug,
            Priority::Info => LevelFilter::Info,
            Priority::Warning => LevelFilter::Warn,
            Priority::Error => LevelFilter::Error,
            Priority::None => LevelFilter::Off,
        }
    }
}

/// `env_logger` setup for the selected areas: records are written to stderr
/// as `[Level] [area] message`. No areas means every area.
pub struct AreaLogger {
    areas: Vec<Area>,
    priority: Priority,
}

impl AreaLogger {
    pub fn new(areas: Vec<Area>, priority: Priority) -> Self {
        let areas = if areas.is_empty() {
            vec![Area::All]
        } else {
            areas
        };
        AreaLogger { areas, priority }
    }

    /// Module filter directives, one per source module of an enabled area.
    pub fn filters(&self) -> Vec<(String, LevelFilter)> {
        let level = self.priority.level_filter();
        MODULES
            .iter()
            .filter(|(_, area)| self.areas.iter().any(|a| a.includes(*area)))
            .map(|(module, _)| (format!("splice::{}", module), level))
            .collect()
    }

    pub fn builder(&self) -> Builder {
        let mut builder = Builder::new();
        builder.filter_level(LevelFilter::Off).target(Target::Stderr);
        for (module, level) in self.filters() {
            builder.filter_module(&module, level);
        }
        builder.format(|buf, record| {
            let area = match Area::of_target(record.target()) {
                Some(area) => area.to_string(),
                None => record.target().to_string(),
            };
            writeln!(buf, "[{}] [{}] {}", level_name(record.level()), area, record.args())
        });
        builder
    }

    /// Install as the global logger. A second install is ignored.
    pub fn install(self) {
        let _ = self.builder().try_init();
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Trace => "Trace",
        Level::Debug => "Debug",
        Level::Info => "Info",
        Level::Warn => "Warning",
        Level::Error => "Error",
    }
}
