#![forbid(unsafe_code)]

//! The processor chain.
//!
//! Every event enters at the head of the chain and is pushed through the
//! active processors in order.  A processor receives the event together with
//! a [`ChainHandle`] and decides what to pass on: it may forward the event,
//! drop it, replace it or inject new events, each by calling
//! [`ChainHandle::forward`], which hands the event to the rest of the chain.
//!
//! Order is computed, not declared positionally: processors are bucketed by
//! [`Phase`], and within a phase a stable topological sort honours each
//! processor's `before`/`after` sets, breaking ties by registration order.
//!
//! Processors add and remove processors through the handle while an event is
//! in flight.  Those requests are queued and applied once the event has left
//! the chain, with one exception: a processor that removes itself is skipped
//! from that moment on, including for events it injects itself.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use solna_core::Error;
use solna_xml::{Attribute, Namespace, QName, StartElement, XmlEvent};
use tracing::{debug, trace};

use crate::context::DocumentContext;
use crate::replay::ReplayBuffer;
use crate::security::SecurityContext;

/// Coarse ordering bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    PreProcess,
    Processing,
    PostProcess,
}

/// Identity of a processor type, used by ordering constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    SecurityHeader,
    BinarySecurityToken,
    Timestamp,
    Signature,
    SignatureReference,
    ReferenceList,
    Decrypt,
    SamlToken,
    SamlConfirmation,
    HeaderStrip,
    SecurityHeaderOutput,
    TimestampOutput,
    SignatureOutput,
    SignatureEndingOutput,
    EncryptOutput,
    EncryptEndingOutput,
    /// A processor supplied by the caller.
    Custom(&'static str),
}

/// A member of the chain.
///
/// Events inside `wsse:Security` (including its own start and end tags) go
/// to [`Processor::process_header_event`], all others to
/// [`Processor::process_event`].  Both forward unchanged by default.
pub trait Processor: Send {
    fn kind(&self) -> ProcessorKind;

    fn phase(&self) -> Phase;

    /// Kinds this processor must run strictly before.
    fn before(&self) -> &[ProcessorKind] {
        &[]
    }

    /// Kinds this processor must run strictly after.
    fn after(&self) -> &[ProcessorKind] {
        &[]
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        chain.forward(event)
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        chain.forward(event)
    }

    /// Called once after the last event; anything left unverified fails here.
    fn finish(&mut self, _chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        Ok(())
    }
}

/// Handle for a processor inside a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(u64);

struct Slot {
    id: ProcessorId,
    kind: ProcessorKind,
    phase: Phase,
    before: Vec<ProcessorKind>,
    after: Vec<ProcessorKind>,
    processor: Box<dyn Processor>,
}

impl Slot {
    fn new(id: ProcessorId, processor: Box<dyn Processor>) -> Self {
        Self {
            id,
            kind: processor.kind(),
            phase: processor.phase(),
            before: processor.before().to_vec(),
            after: processor.after().to_vec(),
            processor,
        }
    }
}

enum Command {
    Add(Slot),
    Remove(ProcessorId),
}

/// State shared by every processor in a chain and its sub-chains.
pub struct ChainContext {
    pub document: DocumentContext,
    pub security: SecurityContext,
    pub replay: ReplayBuffer,
    commands: Vec<Command>,
    removed: HashSet<ProcessorId>,
    output: Vec<XmlEvent>,
    next_id: u64,
    finished: bool,
}

impl ChainContext {
    fn allocate(&mut self) -> ProcessorId {
        let id = ProcessorId(self.next_id);
        self.next_id += 1;
        id
    }
}

/// An ordered, mutable sequence of processors for one message.
pub struct ProcessorChain {
    slots: Vec<Slot>,
    ctx: ChainContext,
}

impl ProcessorChain {
    pub fn new(security: SecurityContext) -> Self {
        Self::with_replay_limit(security, crate::replay::DEFAULT_REPLAY_LIMIT)
    }

    pub fn with_replay_limit(security: SecurityContext, limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            ctx: ChainContext {
                document: DocumentContext::new(),
                security,
                replay: ReplayBuffer::new(limit),
                commands: Vec::new(),
                removed: HashSet::new(),
                output: Vec::new(),
                next_id: 0,
                finished: false,
            },
        }
    }

    /// Add a processor before any event has been pushed (or between events).
    pub fn add_processor(&mut self, processor: Box<dyn Processor>) -> Result<ProcessorId, Error> {
        let id = self.ctx.allocate();
        debug!(kind = ?processor.kind(), "adding processor");
        self.slots.push(Slot::new(id, processor));
        sort_slots(&mut self.slots)?;
        Ok(id)
    }

    pub fn remove_processor(&mut self, id: ProcessorId) {
        self.slots.retain(|slot| slot.id != id);
    }

    /// Kinds of the active processors in execution order.
    pub fn kinds(&self) -> Vec<ProcessorKind> {
        self.slots.iter().map(|slot| slot.kind).collect()
    }

    pub fn context(&self) -> &ChainContext {
        &self.ctx
    }

    pub fn security(&self) -> &SecurityContext {
        &self.ctx.security
    }

    pub fn security_mut(&mut self) -> &mut SecurityContext {
        &mut self.ctx.security
    }

    pub fn document(&self) -> &DocumentContext {
        &self.ctx.document
    }

    pub fn is_finished(&self) -> bool {
        self.ctx.finished
    }

    /// Push one event through the chain.  `EndDocument` also finishes it.
    pub fn push(&mut self, event: XmlEvent) -> Result<(), Error> {
        if self.ctx.finished {
            return Err(Error::Chain(format!(
                "{} received after the end of the stream",
                event.describe()
            )));
        }
        let end_of_document = matches!(event, XmlEvent::EndDocument);

        self.ctx.document.enter(&event);
        let header = self.ctx.document.in_security_header();
        let marker = match &event {
            XmlEvent::EndElement(_) => Some(event.clone()),
            _ => None,
        };
        trace!(event = %event.describe(), header, "dispatching");
        dispatch(&mut self.slots, &mut self.ctx, event, header)?;
        if let Some(end) = marker {
            self.ctx.document.leave(&end);
        }
        self.apply_commands()?;

        if end_of_document {
            self.finish()?;
        }
        Ok(())
    }

    /// Run every processor's finalization step.  Idempotent.
    pub fn finish(&mut self) -> Result<(), Error> {
        if self.ctx.finished {
            return Ok(());
        }
        let mut position = 0;
        while position < self.slots.len() {
            let (head, rest) = self.slots[position..].split_at_mut(1);
            let slot = &mut head[0];
            if !self.ctx.removed.contains(&slot.id) {
                let mut handle = ChainHandle {
                    current: slot.id,
                    downstream: rest,
                    ctx: &mut self.ctx,
                    header: false,
                };
                slot.processor.finish(&mut handle)?;
            }
            position += 1;
        }
        self.apply_commands()?;
        self.ctx.finished = true;
        Ok(())
    }

    /// Take the events that have left the tail of the chain.
    pub fn take_output(&mut self) -> Vec<XmlEvent> {
        std::mem::take(&mut self.ctx.output)
    }

    pub fn into_security(self) -> SecurityContext {
        self.ctx.security
    }

    fn apply_commands(&mut self) -> Result<(), Error> {
        if self.ctx.commands.is_empty() && self.ctx.removed.is_empty() {
            return Ok(());
        }
        let removed = std::mem::take(&mut self.ctx.removed);
        self.slots.retain(|slot| !removed.contains(&slot.id));
        let mut added = false;
        for command in std::mem::take(&mut self.ctx.commands) {
            match command {
                Command::Add(slot) => {
                    if !removed.contains(&slot.id) {
                        self.slots.push(slot);
                        added = true;
                    }
                }
                Command::Remove(id) => self.slots.retain(|slot| slot.id != id),
            }
        }
        if added {
            sort_slots(&mut self.slots)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("processors", &self.kinds())
            .field("finished", &self.ctx.finished)
            .finish()
    }
}

fn dispatch(slots: &mut [Slot], ctx: &mut ChainContext, event: XmlEvent, header: bool) -> Result<(), Error> {
    let Some((first, rest)) = slots.split_first_mut() else {
        ctx.output.push(event);
        return Ok(());
    };
    if ctx.removed.contains(&first.id) {
        return dispatch(rest, ctx, event, header);
    }
    let mut handle = ChainHandle {
        current: first.id,
        downstream: rest,
        ctx,
        header,
    };
    if header {
        first.processor.process_header_event(event, &mut handle)
    } else {
        first.processor.process_event(event, &mut handle)
    }
}

/// A processor's view of the chain while it handles one event.
pub struct ChainHandle<'a> {
    current: ProcessorId,
    downstream: &'a mut [Slot],
    ctx: &'a mut ChainContext,
    header: bool,
}

impl<'a> ChainHandle<'a> {
    /// Pass an event to the rest of the chain.
    pub fn forward(&mut self, event: XmlEvent) -> Result<(), Error> {
        dispatch(self.downstream, self.ctx, event, self.header)
    }

    /// Id of the processor holding this handle.
    pub fn id(&self) -> ProcessorId {
        self.current
    }

    /// Is the current event inside the security header?
    pub fn is_header_event(&self) -> bool {
        self.header
    }

    pub fn document(&self) -> &DocumentContext {
        &self.ctx.document
    }

    pub fn document_mut(&mut self) -> &mut DocumentContext {
        &mut self.ctx.document
    }

    pub fn security(&self) -> &SecurityContext {
        &self.ctx.security
    }

    pub fn security_mut(&mut self) -> &mut SecurityContext {
        &mut self.ctx.security
    }

    pub fn replay(&self) -> &ReplayBuffer {
        &self.ctx.replay
    }

    pub fn replay_mut(&mut self) -> &mut ReplayBuffer {
        &mut self.ctx.replay
    }

    /// Queue a processor; it sees events from the next one on.
    pub fn add_processor(&mut self, processor: Box<dyn Processor>) -> ProcessorId {
        let id = self.ctx.allocate();
        debug!(kind = ?processor.kind(), "queueing processor");
        self.ctx.commands.push(Command::Add(Slot::new(id, processor)));
        id
    }

    /// Queue removal of another processor.
    pub fn remove_processor(&mut self, id: ProcessorId) {
        if id == self.current {
            self.remove_self();
        } else {
            self.ctx.commands.push(Command::Remove(id));
        }
    }

    /// Remove the calling processor; it is not invoked again.
    pub fn remove_self(&mut self) {
        trace!(id = ?self.current, "processor removed itself");
        self.ctx.removed.insert(self.current);
    }

    /// Branch below the current element: events emitted through the
    /// sub-chain reach only the processors after this one.
    pub fn sub_chain(&mut self) -> Result<SubChain<'_, 'a>, Error> {
        let base = self.ctx.document.path().to_vec();
        self.sub_chain_at(base)
    }

    /// Branch with emitted elements placed below `parent_path`.
    pub fn sub_chain_at(&mut self, parent_path: Vec<QName>) -> Result<SubChain<'_, 'a>, Error> {
        if self.ctx.finished {
            return Err(Error::Chain("sub-chain requested after the end of the stream".into()));
        }
        Ok(SubChain {
            handle: self,
            base: parent_path,
            open: Vec::new(),
        })
    }
}

/// Emitter for injected elements.  Paths of emitted start tags are derived
/// from the branch point, and [`SubChain::end`] closes the innermost open
/// element.
pub struct SubChain<'h, 'a> {
    handle: &'h mut ChainHandle<'a>,
    base: Vec<QName>,
    open: Vec<QName>,
}

impl SubChain<'_, '_> {
    fn parent_path(&self) -> Vec<QName> {
        let mut path = self.base.clone();
        path.extend(self.open.iter().cloned());
        path
    }

    /// A start tag positioned at the current emission point.
    pub fn element(&self, name: QName) -> StartElement {
        StartElement::new(name, &self.parent_path())
    }

    /// Emit a start tag built elsewhere; its path is rewritten to the
    /// current emission point.
    pub fn start(&mut self, mut start: StartElement) -> Result<(), Error> {
        let mut path = self.parent_path();
        path.push(start.name.clone());
        start.path = path;
        self.open.push(start.name.clone());
        self.handle.forward(XmlEvent::StartElement(start))
    }

    /// Convenience: start tag with attributes and namespace declarations.
    pub fn start_with(
        &mut self,
        name: QName,
        attributes: Vec<Attribute>,
        namespaces: Vec<Namespace>,
    ) -> Result<(), Error> {
        let mut start = self.element(name);
        start.attributes = attributes;
        start.namespaces = namespaces;
        self.start(start)
    }

    pub fn text(&mut self, text: impl Into<String>) -> Result<(), Error> {
        self.handle.forward(XmlEvent::Characters(text.into()))
    }

    /// Close the innermost element opened through this sub-chain.
    pub fn end(&mut self) -> Result<(), Error> {
        let name = self
            .open
            .pop()
            .ok_or_else(|| Error::Chain("sub-chain has no open element to close".into()))?;
        self.handle.forward(XmlEvent::EndElement(name))
    }

    /// `<name attrs>text</name>`.
    pub fn leaf(&mut self, name: QName, attributes: Vec<Attribute>, text: &str) -> Result<(), Error> {
        self.start_with(name, attributes, Vec::new())?;
        if !text.is_empty() {
            self.text(text)?;
        }
        self.end()
    }

    /// Emit an already-positioned event unchanged.
    pub fn emit(&mut self, event: XmlEvent) -> Result<(), Error> {
        self.handle.forward(event)
    }

    /// Number of elements opened but not yet closed.
    pub fn depth(&self) -> usize {
        self.open.len()
    }
}

/// Order slots: by phase, then by a stable topological sort of the
/// before/after relation within each phase.  Constraints that cross phases
/// are satisfied by the phase order or ignored.
fn sort_slots(slots: &mut Vec<Slot>) -> Result<(), Error> {
    let specs: Vec<_> = slots
        .iter()
        .map(|s| OrderSpec {
            seq: s.id.0,
            kind: s.kind,
            phase: s.phase,
            before: s.before.clone(),
            after: s.after.clone(),
        })
        .collect();
    let order = resolve_order(&specs)?;
    let mut taken: Vec<Option<Slot>> = std::mem::take(slots).into_iter().map(Some).collect();
    for index in order {
        if let Some(slot) = taken[index].take() {
            slots.push(slot);
        }
    }
    Ok(())
}

/// Ordering inputs for one processor.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    /// Registration sequence number; lower registered earlier.
    pub seq: u64,
    pub kind: ProcessorKind,
    pub phase: Phase,
    pub before: Vec<ProcessorKind>,
    pub after: Vec<ProcessorKind>,
}

/// Compute execution order (indices into `specs`).
pub fn resolve_order(specs: &[OrderSpec]) -> Result<Vec<usize>, Error> {
    let mut phases: Vec<Phase> = specs.iter().map(|s| s.phase).collect();
    phases.sort();
    phases.dedup();

    let mut order = Vec::with_capacity(specs.len());
    for phase in phases {
        let members: Vec<usize> = (0..specs.len()).filter(|&i| specs[i].phase == phase).collect();
        let n = members.len();
        // edges[a] holds b when members[a] must run before members[b]
        let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for (a, &ia) in members.iter().enumerate() {
            for (b, &ib) in members.iter().enumerate() {
                if a == b {
                    continue;
                }
                if specs[ia].before.contains(&specs[ib].kind) || specs[ib].after.contains(&specs[ia].kind) {
                    edges[a].insert(b);
                }
            }
        }
        let mut indegree = vec![0usize; n];
        for targets in &edges {
            for &b in targets {
                indegree[b] += 1;
            }
        }
        // ready set ordered by registration sequence
        let mut ready: BTreeSet<(u64, usize)> = (0..n)
            .filter(|&a| indegree[a] == 0)
            .map(|a| (specs[members[a]].seq, a))
            .collect();
        let mut emitted = 0;
        while let Some(next) = ready.pop_first() {
            let a = next.1;
            order.push(members[a]);
            emitted += 1;
            for &b in &edges[a] {
                indegree[b] -= 1;
                if indegree[b] == 0 {
                    ready.insert((specs[members[b]].seq, b));
                }
            }
        }
        if emitted != n {
            let stuck: Vec<_> = (0..n)
                .filter(|&a| indegree[a] > 0)
                .map(|a| format!("{:?}", specs[members[a]].kind))
                .collect();
            return Err(Error::Chain(format!(
                "processor ordering constraints form a cycle: {}",
                stuck.join(", ")
            )));
        }
    }
    Ok(order)
}
