use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, ValueEnum};
use memmap2::Mmap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::codec::sniff_format;
use crate::config::{HashBudget, ParameterFile, RuntimeConfig, SECTION_OPTIONS, SectionOrFilter, add_filter};
use crate::dsl::{FilterSet, FilterTexts};
use crate::error::ExitError;
use crate::metadata::AuthorMode;
use crate::model::Kind;
use crate::pipeline::{self, RunSummary};
use crate::sinks::{Formatter, O5mFormatter, XmlDialect, XmlFormatter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Input file (.osm, .osc, .osh, .o5m, .o5c); `-` reads standard input
    pub input: Option<PathBuf>,

    /// Output file; standard output when omitted or `-`
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format (detected from the output file extension if omitted)
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Imitate the .osm output of pbf2osm
    #[arg(long, group = "emulation")]
    pub emulate_pbf2osm: bool,

    /// Imitate the .osm output of Osmosis
    #[arg(long, group = "emulation")]
    pub emulate_osmosis: bool,

    /// Imitate the .osm output of Osmium
    #[arg(long, group = "emulation")]
    pub emulate_osmium: bool,

    #[command(flatten)]
    pub filters: FilterArgs,

    /// Drop all nodes, or only nodes matching the given filter
    #[arg(long, value_name = "FILTER", num_args = 0..=1, require_equals = true)]
    pub drop_nodes: Option<Vec<String>>,

    /// Drop all ways, or only ways matching the given filter
    #[arg(long, value_name = "FILTER", num_args = 0..=1, require_equals = true)]
    pub drop_ways: Option<Vec<String>>,

    /// Drop all relations, or only relations matching the given filter
    #[arg(long, value_name = "FILTER", num_args = 0..=1, require_equals = true)]
    pub drop_relations: Option<Vec<String>>,

    /// Drop timestamp, changeset and user; keep the version
    #[arg(long)]
    pub drop_author: bool,

    /// Drop the whole author block including the version
    #[arg(long)]
    pub drop_version: bool,

    /// Replace author information with placeholder values
    #[arg(long)]
    pub fake_author: bool,

    /// Write version 1 and nothing else
    #[arg(long)]
    pub fake_version: bool,

    /// Give deleted objects in .osc/.osh output a position of 0,0
    #[arg(long)]
    pub fake_lonlat: bool,

    /// Do not pull in objects that kept objects depend on
    #[arg(long)]
    pub ignore_dependencies: bool,

    /// Hash table memory in MiB: a total, or nodes-ways-relations
    #[arg(long, value_name = "N|N-N-N", env = "OSMFILTER_HASH_MEMORY")]
    pub hash_memory: Option<HashBudget>,

    /// YAML file with further options, keyed by option name
    #[arg(long, value_name = "FILE")]
    pub parameter_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Object and tag filter options. Each may be given more than once.
#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// Keep objects matching the filter
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_nodes: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_ways: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_relations: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_nodes_ways: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_nodes_relations: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_ways_relations: Vec<String>,

    /// Drop objects matching the filter
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub drop: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub drop_nodes_ways: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub drop_nodes_relations: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub drop_ways_relations: Vec<String>,

    /// Keep only tags matching the filter
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_tags: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_node_tags: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_way_tags: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_relation_tags: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_node_way_tags: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_node_relation_tags: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub keep_way_relation_tags: Vec<String>,

    /// Drop tags matching the filter
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub drop_tags: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub drop_node_tags: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub drop_way_tags: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub drop_relation_tags: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub drop_node_way_tags: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub drop_node_relation_tags: Vec<String>,
    #[arg(long, value_name = "FILTER", allow_hyphen_values = true)]
    pub drop_way_relation_tags: Vec<String>,
}

impl FilterArgs {
    /// Values per option name, in the order options are applied.
    pub fn named(&self) -> [(&'static str, &[String]); 25] {
        [
            ("keep", self.keep.as_slice()),
            ("keep-nodes", self.keep_nodes.as_slice()),
            ("keep-ways", self.keep_ways.as_slice()),
            ("keep-relations", self.keep_relations.as_slice()),
            ("keep-nodes-ways", self.keep_nodes_ways.as_slice()),
            ("keep-nodes-relations", self.keep_nodes_relations.as_slice()),
            ("keep-ways-relations", self.keep_ways_relations.as_slice()),
            ("drop", self.drop.as_slice()),
            ("drop-nodes-ways", self.drop_nodes_ways.as_slice()),
            ("drop-nodes-relations", self.drop_nodes_relations.as_slice()),
            ("drop-ways-relations", self.drop_ways_relations.as_slice()),
            ("keep-tags", self.keep_tags.as_slice()),
            ("keep-node-tags", self.keep_node_tags.as_slice()),
            ("keep-way-tags", self.keep_way_tags.as_slice()),
            ("keep-relation-tags", self.keep_relation_tags.as_slice()),
            ("keep-node-way-tags", self.keep_node_way_tags.as_slice()),
            ("keep-node-relation-tags", self.keep_node_relation_tags.as_slice()),
            ("keep-way-relation-tags", self.keep_way_relation_tags.as_slice()),
            ("drop-tags", self.drop_tags.as_slice()),
            ("drop-node-tags", self.drop_node_tags.as_slice()),
            ("drop-way-tags", self.drop_way_tags.as_slice()),
            ("drop-relation-tags", self.drop_relation_tags.as_slice()),
            ("drop-node-way-tags", self.drop_node_way_tags.as_slice()),
            ("drop-node-relation-tags", self.drop_node_relation_tags.as_slice()),
            ("drop-way-relation-tags", self.drop_way_relation_tags.as_slice()),
        ]
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum OutputFormat {
    O5m,
    O5c,
    Osm,
    Osc,
    Osh,
    /// Recognized only to be rejected.
    Pbf,
}

impl Cli {
    fn section_option(&self, kind: Kind) -> Option<&Vec<String>> {
        match kind {
            Kind::Node => self.drop_nodes.as_ref(),
            Kind::Way => self.drop_ways.as_ref(),
            Kind::Relation => self.drop_relations.as_ref(),
        }
    }

    fn emulation(&self) -> Option<XmlDialect> {
        if self.emulate_pbf2osm {
            Some(XmlDialect::Pbf2Osm)
        } else if self.emulate_osmosis {
            Some(XmlDialect::Osmosis)
        } else if self.emulate_osmium {
            Some(XmlDialect::Osmium)
        } else {
            None
        }
    }

    /// Output path, unless writing to standard output.
    fn output_path(&self) -> Option<&Path> {
        self.output.as_deref().filter(|p| *p != Path::new("-"))
    }
}

pub fn output_format_label(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::O5m => "o5m",
        OutputFormat::O5c => "o5c",
        OutputFormat::Osm => "osm",
        OutputFormat::Osc => "osc",
        OutputFormat::Osh => "osh",
        OutputFormat::Pbf => "pbf",
    }
}

/// Explicit format first, then the output extension; `.osm` by default.
pub fn resolve_format(format: Option<OutputFormat>, output: Option<&Path>) -> Result<OutputFormat> {
    let format = format
        .or_else(|| {
            let ext = output?.extension()?.to_str()?;
            match ext.to_lowercase().as_str() {
                "o5m" => Some(OutputFormat::O5m),
                "o5c" => Some(OutputFormat::O5c),
                "osm" => Some(OutputFormat::Osm),
                "osc" => Some(OutputFormat::Osc),
                "osh" => Some(OutputFormat::Osh),
                "pbf" => Some(OutputFormat::Pbf),
                _ => None,
            }
        })
        .unwrap_or(OutputFormat::Osm);
    if format == OutputFormat::Pbf {
        return Err(ExitError::PbfOutput.into());
    }
    Ok(format)
}

/// Merge command line and parameter file; the command line wins per option.
pub fn build_runtime(cli: &Cli) -> Result<RuntimeConfig> {
    let params = match &cli.parameter_file {
        Some(path) => ParameterFile::load(path)
            .context(ExitError::Usage)
            .with_context(|| format!("CLI: Failed to load parameter file {:?}", path))?,
        None => ParameterFile::default(),
    };

    let mut filters = FilterTexts::default();
    for (name, values) in cli.filters.named() {
        let values = if values.is_empty() {
            params.filters.get(name).map(|v| v.values()).unwrap_or_default()
        } else {
            values.to_vec()
        };
        for value in &values {
            add_filter(&mut filters, name, value)?;
        }
    }

    let mut drop_sections = [false; 3];
    for (name, kind) in SECTION_OPTIONS {
        let values = match (cli.section_option(kind), params.section_option(kind)) {
            (Some(values), _) => Some(values.clone()),
            (None, Some(SectionOrFilter::Section(drop))) => drop.then(Vec::new),
            (None, Some(SectionOrFilter::Filter(values))) => Some(values.values()),
            (None, None) => None,
        };
        match values {
            Some(values) if values.iter().all(|v| v.trim().is_empty()) => {
                drop_sections[kind.index()] = true
            }
            Some(values) => {
                for value in &values {
                    add_filter(&mut filters, name, value)?;
                }
            }
            None => {}
        }
    }

    let hash = match (cli.hash_memory, &params.hash_memory) {
        (Some(budget), _) => budget,
        (None, Some(setting)) => setting.budget().context(ExitError::Usage)?,
        (None, None) => HashBudget::default(),
    };

    Ok(RuntimeConfig {
        filters,
        drop_sections,
        author_mode: AuthorMode::from_flags(
            cli.drop_author || params.drop_author,
            cli.drop_version || params.drop_version,
            cli.fake_author || params.fake_author,
            cli.fake_version || params.fake_version,
        ),
        fake_lonlat: cli.fake_lonlat || params.fake_lonlat,
        ignore_dependencies: cli.ignore_dependencies || params.ignore_dependencies,
        hash,
    })
}

pub fn init_formatter(
    format: OutputFormat,
    emulation: Option<XmlDialect>,
    runtime: &RuntimeConfig,
    writer: Box<dyn Write + Send>,
) -> Result<Box<dyn Formatter>> {
    if emulation.is_some() && format != OutputFormat::Osm {
        return Err(ExitError::Usage)
            .context("CLI: Emulation options require .osm output");
    }
    let dialect = match format {
        OutputFormat::O5m | OutputFormat::O5c => None,
        OutputFormat::Osm => Some(emulation.unwrap_or(XmlDialect::Native)),
        OutputFormat::Osc => Some(XmlDialect::Change),
        OutputFormat::Osh => Some(XmlDialect::History),
        OutputFormat::Pbf => return Err(ExitError::PbfOutput.into()),
    };
    Ok(match dialect {
        Some(dialect) => Box::new(XmlFormatter::new(
            writer,
            dialect,
            runtime.author_mode,
            runtime.fake_lonlat,
        )),
        None => Box::new(O5mFormatter::new(
            writer,
            format == OutputFormat::O5c,
            runtime.author_mode,
        )?),
    })
}

/// Input bytes, memory-mapped from a file or read from standard input.
enum InputData {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

impl InputData {
    fn open(path: &Path) -> Result<Self> {
        if path == Path::new("-") {
            let mut data = Vec::new();
            std::io::stdin()
                .lock()
                .read_to_end(&mut data)
                .context(ExitError::UnreadableInput)
                .context("CLI: Failed to read standard input")?;
            return Ok(InputData::Buffered(data));
        }
        let file = File::open(path)
            .context(ExitError::UnreadableInput)
            .with_context(|| format!("CLI: Failed to open input file {:?}", path))?;
        let len = file
            .metadata()
            .context(ExitError::UnreadableInput)?
            .len();
        if len == 0 {
            return Ok(InputData::Buffered(Vec::new()));
        }
        // SAFETY: the mapping is read-only and lives no longer than this run;
        // the input file is not expected to change while it is being filtered.
        let map = unsafe { Mmap::map(&file) }
            .context(ExitError::UnreadableInput)
            .with_context(|| format!("CLI: Failed to map input file {:?}", path))?;
        Ok(InputData::Mapped(map))
    }

    fn bytes(&self) -> &[u8] {
        match self {
            InputData::Mapped(map) => &map[..],
            InputData::Buffered(data) => data,
        }
    }
}

/// Where the formatter writes. Files are written beside their final path
/// and only moved into place once the run succeeded.
enum OutputTarget {
    Stdout,
    File { temp: NamedTempFile, path: PathBuf },
}

impl OutputTarget {
    fn open(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(OutputTarget::Stdout);
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(dir)
            .context(ExitError::OutputOpen)
            .with_context(|| format!("Output: Failed to create output file beside {:?}", path))?;
        Ok(OutputTarget::File {
            temp,
            path: path.to_path_buf(),
        })
    }

    fn writer(&self) -> Result<Box<dyn Write + Send>> {
        match self {
            OutputTarget::Stdout => Ok(Box::new(std::io::stdout())),
            OutputTarget::File { temp, .. } => {
                let file = temp
                    .as_file()
                    .try_clone()
                    .context(ExitError::TempFile)
                    .context("Output: Failed to open temporary output file")?;
                Ok(Box::new(file))
            }
        }
    }

    fn commit(self) -> Result<()> {
        if let OutputTarget::File { temp, path } = self {
            temp.persist(&path)
                .map_err(|e| e.error)
                .context(ExitError::TempFile)
                .with_context(|| format!("Output: Failed to move output into place at {:?}", path))?;
        }
        Ok(())
    }
}

pub fn run(cli: &Cli) -> Result<RunSummary> {
    let Some(input) = cli.input.as_deref() else {
        return Err(ExitError::NoInput.into());
    };
    let format = resolve_format(cli.format, cli.output_path())?;
    let runtime = build_runtime(cli)?;
    let filters = FilterSet::compile(&runtime.filters).context(ExitError::FilterSyntax)?;

    let data = InputData::open(input)?;
    if data.bytes().is_empty() {
        return Err(ExitError::UnreadableInput).context("CLI: Input file is empty");
    }
    let input_format = sniff_format(data.bytes())
        .context(ExitError::UnsupportedFormat)
        .with_context(|| format!("Input: Cannot process {:?}", input))?;
    tracing::info!(
        "Input: {:?} ({:?}, {} bytes)",
        input,
        input_format,
        data.bytes().len()
    );

    let target = OutputTarget::open(cli.output_path())?;
    match cli.output_path() {
        Some(path) => tracing::info!("Sink: {} -> {:?}", output_format_label(format), path),
        None => tracing::info!("Sink: {} -> stdout", output_format_label(format)),
    }
    let mut formatter = init_formatter(format, cli.emulation(), &runtime, target.writer()?)?;

    let summary = pipeline::run(
        data.bytes(),
        input_format,
        &filters,
        &runtime,
        formatter.as_mut(),
        cli.verbose > 0,
    )?;
    drop(formatter);
    target.commit()?;
    Ok(summary)
}
