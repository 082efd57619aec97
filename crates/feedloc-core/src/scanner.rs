//! Feed enrichment scanner
//!
//! Finds post units, works out who wrote each one, asks the resolver for a
//! location and inserts an annotation next to the post's timestamp. Every
//! unit is handled on its own: a malformed post is skipped without
//! affecting its siblings.

use crate::config::DomContract;
use crate::coordinator::Resolver;
use crate::dom::{Document, DomError, NodeId};
use crate::event::{EnrichEvent, EventBus};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

/// Profile paths look like `/handle`
static PROFILE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/([A-Za-z0-9_]+)$").expect("profile path regex"));

/// Inline style of inserted annotations
pub const ANNOTATION_STYLE: &str = "color: #657786; margin-left: 6px; font-size: 0.95em";

/// Counters from one scan pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub units_seen: usize,
    pub annotated: usize,
    /// Resolver had no answer yet; the unit waits for fan-out
    pub awaiting: usize,
    /// Resolved with an empty location, nothing to show
    pub empty: usize,
    pub already_annotated: usize,
    pub skipped_no_handle: usize,
    pub skipped_no_timestamp: usize,
    pub failed: usize,
}

impl ScanReport {
    pub fn merge(&mut self, other: &ScanReport) {
        self.units_seen += other.units_seen;
        self.annotated += other.annotated;
        self.awaiting += other.awaiting;
        self.empty += other.empty;
        self.already_annotated += other.already_annotated;
        self.skipped_no_handle += other.skipped_no_handle;
        self.skipped_no_timestamp += other.skipped_no_timestamp;
        self.failed += other.failed;
    }
}

/// Result of a single annotation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotateOutcome {
    Inserted(NodeId),
    AlreadyPresent,
    EmptyLocation,
    NoTimestamp,
}

/// Discovers, resolves and annotates feed units
#[derive(Clone)]
pub struct EnrichmentScanner {
    contract: DomContract,
    event_bus: EventBus,
}

impl EnrichmentScanner {
    pub fn new(contract: DomContract, event_bus: EventBus) -> Self {
        Self {
            contract,
            event_bus,
        }
    }

    pub fn contract(&self) -> &DomContract {
        &self.contract
    }

    /// Locate the feed container, if the page has rendered it
    pub fn find_container<D: Document>(&self, doc: &D) -> Option<NodeId> {
        let root = doc.root();
        doc.query_first(root, |d, n| self.has_marker(d, n, &self.contract.container_marker))
    }

    pub fn is_unit<D: Document>(&self, doc: &D, node: NodeId) -> bool {
        self.has_marker(doc, node, &self.contract.unit_marker)
    }

    pub fn is_processed<D: Document>(&self, doc: &D, node: NodeId) -> bool {
        doc.attribute(node, &self.contract.processed_attr).is_some()
    }

    /// Process every unprocessed unit under `container`
    pub fn scan_all<D, R>(&self, doc: &mut D, container: NodeId, resolver: &mut R) -> ScanReport
    where
        D: Document,
        R: Resolver + ?Sized,
    {
        let mut report = ScanReport::default();
        self.scan_added(doc, container, resolver, &mut report);
        debug!(
            units = report.units_seen,
            annotated = report.annotated,
            awaiting = report.awaiting,
            "Full scan complete"
        );
        report
    }

    /// Process a newly added node: itself if it is an unprocessed unit,
    /// otherwise any unprocessed units below it
    pub fn scan_added<D, R>(
        &self,
        doc: &mut D,
        node: NodeId,
        resolver: &mut R,
        report: &mut ScanReport,
    ) where
        D: Document,
        R: Resolver + ?Sized,
    {
        for unit in self.pending_units(doc, node) {
            // Recheck: an earlier unit in this batch may have been the same node
            if self.is_processed(doc, unit) {
                continue;
            }
            self.process_unit(doc, unit, resolver, report);
            if let Err(e) = doc.set_attribute(unit, &self.contract.processed_attr, "true") {
                debug!(error = %e, "Failed to mark unit processed");
            }
        }
    }

    fn pending_units<D: Document>(&self, doc: &D, node: NodeId) -> Vec<NodeId> {
        if self.is_unit(doc, node) {
            if self.is_processed(doc, node) {
                return Vec::new();
            }
            return vec![node];
        }
        doc.query_all(node, |d, n| self.is_unit(d, n) && !self.is_processed(d, n))
    }

    fn process_unit<D, R>(&self, doc: &mut D, unit: NodeId, resolver: &mut R, report: &mut ScanReport)
    where
        D: Document,
        R: Resolver + ?Sized,
    {
        report.units_seen += 1;

        let Some(handle) = self.owner_handle(doc, unit) else {
            trace!(unit = unit.index(), "Unit has no profile anchor");
            report.skipped_no_handle += 1;
            return;
        };

        if self.has_annotation(doc, unit) {
            report.already_annotated += 1;
            return;
        }

        match resolver.resolve(&handle) {
            Some(location) => self.annotate_counted(doc, unit, &handle, &location, report),
            None => report.awaiting += 1,
        }
    }

    fn annotate_counted<D: Document>(
        &self,
        doc: &mut D,
        unit: NodeId,
        handle: &str,
        location: &str,
        report: &mut ScanReport,
    ) {
        match self.annotate(doc, unit, location) {
            Ok(AnnotateOutcome::Inserted(_)) => {
                report.annotated += 1;
                self.event_bus
                    .publish(EnrichEvent::UnitAnnotated(handle.to_string()));
            }
            Ok(AnnotateOutcome::AlreadyPresent) => report.already_annotated += 1,
            Ok(AnnotateOutcome::EmptyLocation) => report.empty += 1,
            Ok(AnnotateOutcome::NoTimestamp) => report.skipped_no_timestamp += 1,
            Err(e) => {
                debug!(handle, error = %e, "Failed to annotate unit");
                report.failed += 1;
            }
        }
    }

    /// Handle of the post author
    ///
    /// Taken from the first anchor in the name block (or the whole unit
    /// when there is none) whose path is exactly `/<handle>`.
    pub fn owner_handle<D: Document>(&self, doc: &D, unit: NodeId) -> Option<String> {
        let scope = doc
            .query_first(unit, |d, n| self.has_marker(d, n, &self.contract.name_marker))
            .unwrap_or(unit);

        doc.query_all(scope, |d, n| d.tag(n) == Some(self.contract.anchor_tag.as_str()))
            .into_iter()
            .filter_map(|anchor| doc.attribute(anchor, &self.contract.href_attr))
            .find_map(|href| {
                PROFILE_PATH
                    .captures(href)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            })
    }

    /// Whether the unit's timestamp container already holds an annotation
    pub fn has_annotation<D: Document>(&self, doc: &D, unit: NodeId) -> bool {
        self.timestamp_slot(doc, unit)
            .map(|(container, _)| self.container_has_annotation(doc, container))
            .unwrap_or(false)
    }

    /// Insert the location annotation next to the unit's timestamp
    ///
    /// The existing-annotation check runs immediately before insertion, so
    /// a unit never ends up with two annotations.
    pub fn annotate<D: Document>(
        &self,
        doc: &mut D,
        unit: NodeId,
        location: &str,
    ) -> Result<AnnotateOutcome, DomError> {
        if location.is_empty() {
            return Ok(AnnotateOutcome::EmptyLocation);
        }

        let Some((container, anchor_child)) = self.timestamp_slot(doc, unit) else {
            return Ok(AnnotateOutcome::NoTimestamp);
        };

        if self.container_has_annotation(doc, container) {
            return Ok(AnnotateOutcome::AlreadyPresent);
        }

        let span = doc.create_element(&self.contract.annotation_tag);
        doc.set_attribute(span, "class", &self.contract.annotation_class)?;
        doc.set_attribute(span, "style", ANNOTATION_STYLE)?;
        doc.set_text(span, &format!(" . {}", location))?;

        let reference = doc.next_sibling(anchor_child);
        doc.insert_before(container, span, reference)?;

        Ok(AnnotateOutcome::Inserted(span))
    }

    /// Annotate every unit in the document written by `handle`
    ///
    /// Returns the number of annotations inserted.
    pub fn annotate_handle<D: Document>(&self, doc: &mut D, handle: &str, location: &str) -> usize {
        if handle.is_empty() || location.is_empty() {
            return 0;
        }

        let root = doc.root();
        let units = doc.query_all(root, |d, n| self.is_unit(d, n));
        let mut report = ScanReport::default();

        for unit in units {
            if self.owner_handle(doc, unit).as_deref() != Some(handle) {
                continue;
            }
            self.annotate_counted(doc, unit, handle, location, &mut report);
        }

        debug!(handle, inserted = report.annotated, "Fanned out location");
        report.annotated
    }

    /// The container that should hold the annotation, and its child that
    /// contains the timestamp
    fn timestamp_slot<D: Document>(&self, doc: &D, unit: NodeId) -> Option<(NodeId, NodeId)> {
        let time = doc.query_first(unit, |d, n| {
            d.tag(n) == Some(self.contract.timestamp_tag.as_str())
        })?;

        let container = doc
            .closest(time, |d, n| d.tag(n) == Some(self.contract.anchor_tag.as_str()))
            .and_then(|anchor| doc.parent(anchor))
            .or_else(|| doc.parent(time))?;

        let mut child = time;
        while doc.parent(child) != Some(container) {
            child = doc.parent(child)?;
        }
        Some((container, child))
    }

    fn container_has_annotation<D: Document>(&self, doc: &D, container: NodeId) -> bool {
        doc.query_first(container, |d, n| {
            d.has_class(n, &self.contract.annotation_class)
        })
        .is_some()
    }

    fn has_marker<D: Document>(&self, doc: &D, node: NodeId, marker: &str) -> bool {
        doc.attribute(node, &self.contract.marker_attr) == Some(marker)
    }
}
