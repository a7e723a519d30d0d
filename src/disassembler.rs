use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use crate::apivec::{ApiEffect, ApiTable};
use crate::decipher::{decipher, DiscoverySink, Reference, StepError};
use crate::lang::Language;
use crate::sequencer::Sequencer;

pub mod listing;

/// An address waiting to be traversed, with the sequencer stack it was
/// discovered under. Processed in FIFO order, so sibling branches
/// interleave breadth-first.
#[derive(Debug)]
struct PendingEntryPoint {
    offset: usize,
    stack: Sequencer,
}

/// Breadth-first traversal of a memory image.
///
/// Starting from the declared entry points, discovery-mode deciphering
/// learns instruction boundaries and new entry points until the queue
/// drains; [`Disassembler::render`] then re-runs every recorded
/// (offset, language) pair in render mode to produce the listing. All
/// result maps are append-only during [`Disassembler::run`] and
/// read-only afterwards.
#[derive(Debug)]
pub struct Disassembler<'a> {
    image: &'a [u8],
    origin: u32,
    api: ApiTable,
    queue: VecDeque<PendingEntryPoint>,
    /// (offset, language name) pairs already traversed.
    visited: HashSet<(usize, String)>,
    /// Successful decodes; one offset may carry several interpretations.
    decoded: BTreeMap<usize, BTreeMap<String, Arc<Language>>>,
    problems: BTreeMap<usize, Vec<String>>,
    /// Offsets confirmed as referenced entry points, as opposed to
    /// bytes reached only by straight-line fallthrough.
    entry_points: BTreeSet<usize>,
    /// Out-of-image address to the languages that referenced it.
    externals: BTreeMap<u32, BTreeSet<String>>,
    deciphered: Vec<bool>,
}

impl<'a> Disassembler<'a> {
    pub fn new(
        image: &'a [u8],
        origin: u32,
        entries: &[(u32, Arc<Language>)],
        api: ApiTable,
    ) -> Self {
        let mut disassembler = Self {
            image,
            origin,
            api,
            queue: VecDeque::new(),
            visited: HashSet::new(),
            decoded: BTreeMap::new(),
            problems: BTreeMap::new(),
            entry_points: BTreeSet::new(),
            externals: BTreeMap::new(),
            deciphered: vec![false; image.len()],
        };
        for (address, lang) in entries {
            match disassembler.image_offset(*address) {
                Some(offset) => {
                    disassembler.entry_points.insert(offset);
                    disassembler.queue.push_back(PendingEntryPoint {
                        offset,
                        stack: Sequencer::new(lang),
                    });
                }
                None => {
                    disassembler.note_external(*address, lang.name());
                }
            }
        }
        disassembler
    }

    /// Run the discovery traversal to completion.
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self) {
        while let Some(pending) = self.queue.pop_front() {
            self.traverse(pending);
        }
    }

    /// One instruction sequence: decipher from the pending offset until
    /// the pair was already visited, the current language is null, or a
    /// step fails.
    fn traverse(&mut self, pending: PendingEntryPoint) {
        let mut sequencer = pending.stack;
        let mut offset = pending.offset;
        loop {
            let lang = sequencer.current();
            if lang.is_null() {
                break;
            }
            if self.visited.contains(&(offset, lang.name().to_string())) {
                break;
            }
            let mut sink = DiscoverySink::new(&mut sequencer);
            match decipher(&lang, self.image, offset, self.origin, &mut sink) {
                Ok(size) => {
                    let references = sink.references;
                    tracing::trace!(offset, lang = %lang.name(), size, "deciphered");
                    self.visited.insert((offset, lang.name().to_string()));
                    self.decoded
                        .entry(offset)
                        .or_default()
                        .insert(lang.name().to_string(), lang.clone());
                    for flag in &mut self.deciphered[offset..offset + size] {
                        *flag = true;
                    }
                    for reference in references {
                        self.reference(reference, &lang, &mut sequencer);
                    }
                    offset += size;
                    sequencer.advance();
                }
                Err(error @ StepError::UnknownOpcode { .. })
                | Err(error @ StepError::IncompleteInstruction { .. }) => {
                    tracing::debug!(offset, %error, "sequence abandoned");
                    self.problems
                        .entry(offset)
                        .or_default()
                        .push(error.to_string());
                    break;
                }
            }
        }
    }

    /// Handle one absolute-address reference discovered mid-decode.
    fn reference(&mut self, reference: Reference, lang: &Arc<Language>, sequencer: &mut Sequencer) {
        match reference {
            Reference::Branch(address) => {
                self.enqueue(address, lang.name(), sequencer.snapshot());
            }
            Reference::Call(address) => {
                self.enqueue(address, lang.name(), sequencer.snapshot());
                // A known platform vector changes how the *current*
                // traversal continues after the call.
                if let Some(effect) = self.api.lookup(address).cloned() {
                    tracing::debug!(address, "API vector hit");
                    match effect {
                        ApiEffect::Terminate => sequencer.terminate(),
                        ApiEffect::SwitchPermanently(l) => sequencer.switch_permanently(&l),
                        ApiEffect::SwitchTemporarily(l) => sequencer.switch_temporarily(&l),
                    }
                }
            }
            Reference::Entry(address, target) => {
                let stack = Sequencer::new(&target);
                self.enqueue(address, target.name(), stack);
            }
        }
    }

    fn enqueue(&mut self, address: u32, lang_name: &str, stack: Sequencer) {
        let Some(offset) = self.image_offset(address) else {
            self.note_external(address, lang_name);
            return;
        };
        self.entry_points.insert(offset);
        let active = stack.peek();
        if !self.visited.contains(&(offset, active.name().to_string())) {
            self.queue.push_back(PendingEntryPoint { offset, stack });
        }
    }

    fn image_offset(&self, address: u32) -> Option<usize> {
        let offset = address.checked_sub(self.origin)? as usize;
        (offset < self.image.len()).then_some(offset)
    }

    fn note_external(&mut self, address: u32, lang_name: &str) {
        self.externals
            .entry(address)
            .or_default()
            .insert(lang_name.to_string());
    }

    pub fn image(&self) -> &[u8] {
        self.image
    }

    pub fn origin(&self) -> u32 {
        self.origin
    }

    /// Successful decodes by offset, then by language name.
    pub fn decoded(&self) -> &BTreeMap<usize, BTreeMap<String, Arc<Language>>> {
        &self.decoded
    }

    pub fn problems(&self) -> &BTreeMap<usize, Vec<String>> {
        &self.problems
    }

    pub fn entry_points(&self) -> &BTreeSet<usize> {
        &self.entry_points
    }

    /// The cross-reference ledger: out-of-image addresses and the
    /// languages that referenced them.
    pub fn externals(&self) -> &BTreeMap<u32, BTreeSet<String>> {
        &self.externals
    }

    pub fn deciphered(&self) -> &[bool] {
        &self.deciphered
    }
}
