use bitvec::prelude::*;

use crate::probe::{
    cmsisdap::{
        commands::{
            jtag::sequence::{Sequence, SequenceRequest},
            send_command, CmsisDapError,
        },
        CmsisDap,
    },
    DebugProbeError,
};

pub mod configure;
pub mod idcode;
pub mod sequence;

/// One TCK cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Cycle {
    tms: bool,
    tdi: bool,
    capture: bool,
}

/// TCK cycles queued for the probe's JTAG sequence engine.
///
/// The navigation helpers assume the TAP sits in Run-Test/Idle between shifts.
#[derive(Clone, Debug, Default)]
pub(crate) struct JtagBits {
    cycles: Vec<Cycle>,
}

impl JtagBits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tms(&mut self, levels: &[bool]) -> &mut Self {
        self.cycles.extend(levels.iter().map(|&tms| Cycle {
            tms,
            tdi: true,
            capture: false,
        }));
        self
    }

    /// Test-Logic-Reset, then Run-Test/Idle.
    pub fn reset(&mut self) -> &mut Self {
        self.tms(&[true, true, true, true, true, false])
    }

    pub fn enter_shift_ir(&mut self) -> &mut Self {
        self.tms(&[true, true, false, false])
    }

    pub fn enter_shift_dr(&mut self) -> &mut Self {
        self.tms(&[true, false, false])
    }

    /// Shift `tdi` through the selected register. The last bit leaves the shift state
    /// through Exit1 and Update back into Run-Test/Idle.
    pub fn shift(&mut self, tdi: &BitSlice<u8, Lsb0>, capture: bool) -> &mut Self {
        let last = tdi.len().saturating_sub(1);
        self.cycles
            .extend(tdi.iter().by_vals().enumerate().map(|(i, tdi)| Cycle {
                tms: i == last,
                tdi,
                capture,
            }));
        self.tms(&[true, false])
    }

    /// Shift `len` copies of `level` while staying in the shift state.
    pub fn fill(&mut self, level: bool, len: usize, capture: bool) -> &mut Self {
        self.cycles.extend(std::iter::repeat(Cycle {
            tms: false,
            tdi: level,
            capture,
        })
        .take(len));
        self
    }

    /// Group the cycles into sequences of at most 64 cycles sharing TMS and capture.
    fn sequences(&self) -> Result<Vec<Sequence>, CmsisDapError> {
        let mut sequences = Vec::new();

        for chunk in self
            .cycles
            .chunk_by(|a, b| a.tms == b.tms && a.capture == b.capture)
        {
            for run in chunk.chunks(64) {
                let mut data = [0u8; 8];
                for (i, cycle) in run.iter().enumerate() {
                    if cycle.tdi {
                        data[i / 8] |= 1 << (i % 8);
                    }
                }
                sequences.push(Sequence::new(
                    run.len() as u8,
                    run[0].capture,
                    run[0].tms,
                    data,
                )?);
            }
        }

        Ok(sequences)
    }
}

/// Bytes of a report left for sequences once the command id and the sequence count are in.
fn batch_limit(report_size: usize) -> usize {
    report_size.saturating_sub(2)
}

impl CmsisDap {
    /// Clock out `bits` and return every captured TDO level in order.
    ///
    /// Sequences are packed into as few DAP_JTAG_Sequence commands as the packet size allows.
    pub(crate) fn jtag_io(&mut self, bits: &JtagBits) -> Result<BitVec<u8, Lsb0>, DebugProbeError> {
        let limit = batch_limit(self.device.report_size());
        let mut captured = BitVec::new();

        let mut batch = Vec::new();
        let mut request_len = 0;
        let mut response_len = 0;
        for sequence in bits.sequences()? {
            if !batch.is_empty()
                && (request_len + sequence.request_len() > limit
                    || response_len + sequence.response_len() > limit
                    || batch.len() == usize::from(u8::MAX))
            {
                captured.extend_from_bitslice(&self.send_jtag_sequences(std::mem::take(&mut batch))?);
                request_len = 0;
                response_len = 0;
            }
            request_len += sequence.request_len();
            response_len += sequence.response_len();
            batch.push(sequence);
        }
        if !batch.is_empty() {
            captured.extend_from_bitslice(&self.send_jtag_sequences(batch)?);
        }

        Ok(captured)
    }

    fn send_jtag_sequences(
        &mut self,
        sequences: Vec<Sequence>,
    ) -> Result<BitVec<u8, Lsb0>, DebugProbeError> {
        tracing::trace!(
            "JTAG sequence: {} sequences, {} cycles",
            sequences.len(),
            sequences.iter().map(|s| usize::from(s.tck_cycles())).sum::<usize>()
        );
        let request = SequenceRequest::new(sequences)?;
        let response = send_command(&mut self.device, &request)?;
        response.status.into_result()?;
        Ok(response.tdo)
    }
}
