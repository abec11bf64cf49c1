#![forbid(unsafe_code)]

use solna_core::Error;
use solna_xml::XmlEvent;

use crate::chain::{ChainHandle, Phase, Processor, ProcessorKind};

/// Drops the `wsse:Security` header from the output once it has been
/// processed.
#[derive(Debug, Default)]
pub struct HeaderStripProcessor;

impl Processor for HeaderStripProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::HeaderStrip
    }

    fn phase(&self) -> Phase {
        Phase::PostProcess
    }

    fn process_header_event(&mut self, _event: XmlEvent, _chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        Ok(())
    }
}
