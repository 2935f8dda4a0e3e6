use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::codec::{CodecError, Decoder, InputFormat, Restart, Sections, locate_sections};
use crate::config::RuntimeConfig;
use crate::dsl::FilterSet;
use crate::error::ExitError;
use crate::model::{BBox, Body, Entity, Kind};
use crate::sinks::Formatter;
use crate::storage::{ClosureOutcome, EdgeSpill, InitOutcome, MAX_HIERARCHY_PASSES, MembershipStore};
use crate::utils::{ProgressCounter, WarnLimiter};

const PROGRESS_INTERVAL: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub read: u64,
    pub written: u64,
    /// Set when relation dependencies were resolved.
    pub hierarchy: Option<ClosureOutcome>,
}

/// Reads the objects of a contiguous run of kinds, starting at a restart
/// point. Objects of earlier kinds are skipped, a later kind ends the scan.
struct SectionScan<'a> {
    decoder: Decoder<'a>,
    first: Kind,
    last: Kind,
    done: bool,
}

impl<'a> SectionScan<'a> {
    fn new(data: &'a [u8], format: InputFormat, start: Restart, first: Kind, last: Kind) -> Self {
        let mut decoder = Decoder::new(data, format);
        decoder.seek(start);
        Self {
            decoder,
            first,
            last,
            done: false,
        }
    }

    fn bbox(&self) -> Option<BBox> {
        self.decoder.bbox()
    }

    fn next(&mut self, truncated: &mut WarnLimiter) -> Result<Option<Entity>> {
        while !self.done {
            match self.decoder.next_entity() {
                Ok(Some(entity)) => {
                    let kind = entity.kind();
                    if kind < self.first {
                        continue;
                    }
                    if kind > self.last {
                        self.done = true;
                        break;
                    }
                    return Ok(Some(entity));
                }
                Ok(None) => self.done = true,
                Err(e @ CodecError::TruncatedInput { .. }) => {
                    if truncated.allow() {
                        warn!("Input ends unexpectedly: {}", e);
                    }
                    self.done = true;
                }
                Err(e) => {
                    return Err(e)
                        .context(ExitError::UnreadableInput)
                        .context("Pipeline: Failed to decode input");
                }
            }
        }
        Ok(None)
    }
}

/// `@id`, `@uid` and `@user` rendered for the filters.
struct PseudoKeys {
    id: String,
    uid: String,
}

impl PseudoKeys {
    fn of(entity: &Entity) -> Self {
        Self {
            id: entity.id.to_string(),
            uid: entity.author.as_ref().map_or(0, |a| a.uid).to_string(),
        }
    }
}

/// The tags an object filter sees; pseudo keys are appended when in use.
fn tag_view<'e>(entity: &'e Entity, pseudo: Option<&'e PseudoKeys>) -> Vec<(&'e str, &'e str)> {
    let mut view: Vec<(&str, &str)> = entity
        .tags
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    if let Some(pseudo) = pseudo {
        let user = entity.author.as_ref().map_or("", |a| a.user.as_str());
        view.push(("@id", pseudo.id.as_str()));
        view.push(("@uid", pseudo.uid.as_str()));
        view.push(("@user", user));
    }
    view
}

/// State shared by all stages of one run.
struct EngineContext<'a> {
    data: &'a [u8],
    format: InputFormat,
    filters: &'a FilterSet,
    runtime: &'a RuntimeConfig,
    /// Present only when dependencies are resolved.
    store: Option<MembershipStore>,
    truncated: WarnLimiter,
    sequence: WarnLimiter,
    progress: bool,
}

impl<'a> EngineContext<'a> {
    fn recursive(&self) -> bool {
        self.store.is_some()
    }

    fn is_marked(&self, kind: Kind, id: i64) -> bool {
        self.store.as_ref().is_some_and(|s| s.test(kind, id))
    }

    fn keep_matches(&self, kind: Kind, tags: &[(&str, &str)]) -> bool {
        let keep = self.filters.keep(kind);
        !keep.active || keep.matches(tags)
    }

    fn drop_matches(&self, kind: Kind, tags: &[(&str, &str)]) -> bool {
        let drop = self.filters.drop(kind);
        drop.active && drop.matches(tags)
    }

    /// Marked, or selected by the keep list, and not rejected by the drop list.
    fn selected(&self, entity: &Entity) -> bool {
        let kind = entity.kind();
        let pseudo = self
            .filters
            .needs_pseudo_keys()
            .then(|| PseudoKeys::of(entity));
        let tags = tag_view(entity, pseudo.as_ref());
        let keep = self.is_marked(kind, entity.id) || self.keep_matches(kind, &tags);
        keep && !self.drop_matches(kind, &tags)
    }

    fn scan(&self, start: Restart, first: Kind, last: Kind) -> SectionScan<'a> {
        SectionScan::new(self.data, self.format, start, first, last)
    }

    /// Relations selected on their own tags are marked; relations matching
    /// the drop list are barred from being pulled in. Relation-to-relation
    /// edges of every relation go to the spill.
    fn collect_relations(&mut self, sections: &Sections, spill: &mut EdgeSpill) -> Result<u64> {
        let progress = ProgressCounter::new("Stage 1: relations", PROGRESS_INTERVAL, self.progress);
        let mut scan = self.scan(sections.start_of(Kind::Relation), Kind::Relation, Kind::Relation);
        let mut selected = 0u64;
        while let Some(entity) = scan.next(&mut self.truncated)? {
            progress.inc(1);
            if let Body::Relation(members) = &entity.body {
                for member in members.iter().filter(|m| m.kind == Kind::Relation) {
                    spill
                        .push(entity.id, member.id)
                        .context(ExitError::TempFile)?;
                }
            }

            let pseudo = self
                .filters
                .needs_pseudo_keys()
                .then(|| PseudoKeys::of(&entity));
            let tags = tag_view(&entity, pseudo.as_ref());
            let marked = self.is_marked(Kind::Relation, entity.id);
            let dropped = self.drop_matches(Kind::Relation, &tags);
            let keep = !dropped && (marked || self.keep_matches(Kind::Relation, &tags));
            if let Some(store) = self.store.as_mut() {
                if dropped {
                    store.mark_negative(entity.id);
                }
                if keep && !marked {
                    store.mark(Kind::Relation, entity.id);
                    selected += 1;
                }
            }
        }
        progress.finish();
        Ok(selected)
    }

    /// Marked relations mark their node and way members.
    fn mark_relation_members(&mut self, sections: &Sections) -> Result<()> {
        let progress = ProgressCounter::new("Stage 2: relations", PROGRESS_INTERVAL, self.progress);
        let mut scan = self.scan(sections.start_of(Kind::Relation), Kind::Relation, Kind::Relation);
        while let Some(entity) = scan.next(&mut self.truncated)? {
            progress.inc(1);
            if !self.selected(&entity) {
                continue;
            }
            let (Some(store), Body::Relation(members)) = (self.store.as_mut(), &entity.body) else {
                continue;
            };
            store.mark(Kind::Relation, entity.id);
            for member in members.iter().filter(|m| m.kind != Kind::Relation) {
                store.mark(member.kind, member.id);
            }
        }
        progress.finish();
        Ok(())
    }

    /// Kept ways mark themselves and their nodes.
    fn mark_way_nodes(&mut self, sections: &Sections) -> Result<()> {
        let progress = ProgressCounter::new("Stage 3: ways", PROGRESS_INTERVAL, self.progress);
        let mut scan = self.scan(sections.start_of(Kind::Way), Kind::Way, Kind::Way);
        while let Some(entity) = scan.next(&mut self.truncated)? {
            progress.inc(1);
            if !self.selected(&entity) {
                continue;
            }
            let (Some(store), Body::Way(nodes)) = (self.store.as_mut(), &entity.body) else {
                continue;
            };
            store.mark(Kind::Way, entity.id);
            for &node in nodes {
                store.mark(Kind::Node, node);
            }
        }
        progress.finish();
        Ok(())
    }

    /// Whether an object survives the final scan. With dependencies
    /// resolved, ways and relations are only kept when marked.
    fn keeps(&self, entity: &Entity) -> bool {
        let kind = entity.kind();
        if !self.recursive() || kind == Kind::Node {
            return self.selected(entity);
        }
        if !self.is_marked(kind, entity.id) {
            return false;
        }
        let pseudo = self
            .filters
            .needs_pseudo_keys()
            .then(|| PseudoKeys::of(entity));
        !self.drop_matches(kind, &tag_view(entity, pseudo.as_ref()))
    }

    fn emit(&mut self, formatter: &mut dyn Formatter) -> Result<(u64, u64)> {
        let progress = ProgressCounter::new("Stage 4: objects", PROGRESS_INTERVAL, self.progress);
        let mut scan = self.scan(Restart::default(), Kind::Node, Kind::Relation);
        let mut started = false;
        let mut last: Option<(Kind, i64)> = None;
        let mut written = 0u64;

        while let Some(mut entity) = scan.next(&mut self.truncated)? {
            progress.inc(1);
            let kind = entity.kind();
            if let Some((last_kind, last_id)) = last
                && (kind < last_kind || (kind == last_kind && entity.id < last_id))
                && self.sequence.allow()
            {
                warn!("Wrong sequence at {} {}", kind, entity.id);
            }
            last = Some((kind, entity.id));

            if !self.keeps(&entity) || self.runtime.drops_section(kind) {
                continue;
            }
            if entity.deleted && !formatter.accepts_deletions() {
                continue;
            }
            if self.filters.has_tag_filter(kind) {
                let filters = self.filters;
                entity.tags.retain(|(k, v)| filters.keeps_tag(kind, k, v));
            }

            if !started {
                formatter.start(scan.bbox()).context(ExitError::Write)?;
                started = true;
            }
            formatter
                .write(&entity)
                .context(ExitError::Write)
                .with_context(|| format!("Pipeline: Failed writing {} {}", kind, entity.id))?;
            written += 1;
        }

        if !started {
            formatter.start(scan.bbox()).context(ExitError::Write)?;
        }
        formatter
            .finish()
            .context(ExitError::Write)
            .context("Pipeline: Failed to finish output")?;
        progress.finish();
        Ok((progress.count(), written))
    }
}

fn init_store(runtime: &RuntimeConfig) -> Result<MembershipStore> {
    let budget = runtime.hash;
    let (store, outcome) = MembershipStore::init(budget.nodes, budget.ways, budget.relations)
        .context(ExitError::Hash)?;
    if outcome == InitOutcome::Reduced {
        warn!(
            "Hash size had to be reduced (requested {}-{}-{} MiB)",
            budget.nodes, budget.ways, budget.relations
        );
    }
    Ok(store)
}

/// Filter `data` into `formatter`, resolving dependencies of kept objects
/// when an object keep filter is in effect.
pub fn run(
    data: &[u8],
    format: InputFormat,
    filters: &FilterSet,
    runtime: &RuntimeConfig,
    formatter: &mut dyn Formatter,
    progress: bool,
) -> Result<RunSummary> {
    let recursive = filters.has_keep_filter() && !runtime.ignore_dependencies;
    let store = if recursive {
        Some(init_store(runtime)?)
    } else {
        None
    };
    let mut ctx = EngineContext {
        data,
        format,
        filters,
        runtime,
        store,
        truncated: WarnLimiter::default(),
        sequence: WarnLimiter::default(),
        progress,
    };

    let mut hierarchy = None;
    if recursive {
        let sections = locate_sections(data, format)
            .context(ExitError::UnreadableInput)
            .context("Pipeline: Failed to locate sections")?;
        debug!(
            "Sections: ways at {}, relations at {}",
            sections.ways.offset, sections.relations.offset
        );

        let mut spill = EdgeSpill::new().context(ExitError::TempFile)?;
        let selected = ctx.collect_relations(&sections, &mut spill)?;
        info!(
            "Stage 1: {} relations selected, {} relation references",
            selected,
            spill.len()
        );

        if let Some(store) = ctx.store.as_mut() {
            let outcome = spill
                .close_relations(store, MAX_HIERARCHY_PASSES)
                .context(ExitError::TempFile)?;
            if !outcome.converged {
                warn!(
                    "Relation dependencies too complex (more than {} hierarchy levels); \
                     a few relations might have been excluded although meeting filter criteria",
                    MAX_HIERARCHY_PASSES
                );
            }
            hierarchy = Some(outcome);
        }

        ctx.mark_relation_members(&sections)?;
        info!("Stage 2: relation members marked");
        ctx.mark_way_nodes(&sections)?;
        info!("Stage 3: way nodes marked");
    }

    let (read, written) = ctx.emit(formatter)?;
    match hierarchy {
        Some(outcome) => info!(
            "Relation hierarchies: {} of maximal {}",
            outcome.passes, MAX_HIERARCHY_PASSES
        ),
        None => info!("No hierarchical filtering"),
    }
    info!("Stage 4: {} of {} objects written", written, read);

    Ok(RunSummary {
        read,
        written,
        hierarchy,
    })
}
