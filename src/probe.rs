//! Register discovery by differential probing
//!
//! For each pin the line is driven low then high through the kernel GPIO
//! interface, and one candidate register per group is sampled after each
//! step. The first group whose word changed holds the pin; the size of the
//! change is the pin's mask.
//!
//! Probing assumes nothing else touches GPIO state on the board between the
//! two samples. A concurrent change elsewhere would be attributed to the pin
//! being probed.

use crate::board::{self, BoardDescriptor};
use crate::error::{Error, Result};
use crate::line::{LineProvider, OutputLine};
use crate::registry::{Pin, PinKey, PinRegisters, PinRegistry, Resolved, Role};
use crate::window::WindowMap;
use std::path::Path;

/// Index of the first position where the two samples differ
pub fn first_difference(before: &[u32], after: &[u32]) -> Option<usize> {
    before.iter().zip(after).position(|(b, a)| b != a)
}

/// Magnitude of the change between two register samples
#[inline]
pub fn value_diff(a: u32, b: u32) -> u32 {
    a.abs_diff(b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Registers attached to the pin
    Resolved { group: usize, mask: u32 },
    /// No sampled register changed
    Ambiguous,
}

/// Counts for one discovery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub probed: usize,
    pub resolved: usize,
    pub ambiguous: usize,
    pub failed: usize,
}

pub struct Prober<'a, L: LineProvider> {
    board: &'a BoardDescriptor,
    windows: &'a WindowMap,
    lines: &'a mut L,
    strict: bool,
}

impl<'a, L: LineProvider> Prober<'a, L> {
    pub fn new(board: &'a BoardDescriptor, windows: &'a WindowMap, lines: &'a mut L) -> Self {
        Self {
            board,
            windows,
            lines,
            strict: false,
        }
    }

    /// Treat a pin with no register change as a failure in [`Prober::run`]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Read the candidate register for `role` in every group
    fn sample(&self, role: Role) -> Result<Vec<u32>> {
        (0..self.board.groups.len())
            .map(|idx| {
                let offset = self.board.candidates.resolve(role, idx);
                self.windows.read32(self.board.group_window(idx), offset)
            })
            .collect()
    }

    /// Probe one pin and attach its registers when a change is found
    pub fn probe(&mut self, pin: &mut Pin) -> Result<ProbeOutcome> {
        let role = self.board.probe_role();

        let (before, after) = {
            let mut line = self.lines.request_output(pin.key)?;
            line.set_value(false)?;
            let before = self.sample(role)?;
            line.set_value(true)?;
            let after = self.sample(role)?;
            (before, after)
        };

        let Some(idx) = first_difference(&before, &after) else {
            log::warn!(
                "Pin {} ({}): no {} register changed, skipping",
                pin.key,
                pin.name,
                role
            );
            return Ok(ProbeOutcome::Ambiguous);
        };

        let mask = value_diff(before[idx], after[idx]);
        if mask.count_ones() != 1 {
            log::warn!(
                "Pin {} ({}): change {:#010x} -> {:#010x} spans more than one bit",
                pin.key,
                pin.name,
                before[idx],
                after[idx]
            );
        }

        let offsets = Role::ALL.map(|r| self.board.candidates.resolve(r, idx));
        // A shared register needs bits outside the mask to store the clear word
        if mask == u32::MAX && offsets[2] == offsets[3] {
            log::warn!(
                "Pin {} ({}): whole shared register {:#04x} changed, skipping",
                pin.key,
                pin.name,
                offsets[2]
            );
            return Ok(ProbeOutcome::Ambiguous);
        }
        let registers = PinRegisters::from_probe(pin.key, offsets, mask)?;

        let window = self.board.group_window(idx);
        let size = self.windows.get(window)?.size();
        for reg in registers.iter() {
            reg.check_bounds(size)?;
        }

        let group = self.board.groups[idx].name.clone();
        log::info!(
            "Pin {} ({}): group {}, {} {:#04x}, mask {:#010x}{}",
            pin.key,
            pin.name,
            group,
            role,
            registers.out_on.offset,
            mask,
            if registers.shares_output_register() {
                ", shared data register"
            } else {
                ""
            }
        );

        pin.resolved = Some(Resolved {
            group,
            window,
            registers,
        });
        Ok(ProbeOutcome::Resolved { group: idx, mask })
    }

    /// Like [`Prober::probe`], but no register change is an error
    pub fn probe_strict(&mut self, pin: &mut Pin) -> Result<(usize, u32)> {
        match self.probe(pin)? {
            ProbeOutcome::Resolved { group, mask } => Ok((group, mask)),
            ProbeOutcome::Ambiguous => Err(Error::ProbeAmbiguity { key: pin.key }),
        }
    }

    /// Probe every pin of the registry, or only the pins in `only`.
    ///
    /// Per-pin faults are logged and counted; probing carries on with the
    /// next pin. An empty registry is an error.
    pub fn run(&mut self, registry: &mut PinRegistry, only: &[PinKey]) -> Result<ProbeSummary> {
        if registry.is_empty() {
            return Err(Error::EmptyRegistry);
        }
        for key in only {
            registry.get(*key)?;
        }

        let mut summary = ProbeSummary::default();
        for pin in registry.pins_mut() {
            if !only.is_empty() && !only.contains(&pin.key) {
                continue;
            }
            summary.probed += 1;

            let outcome = if self.strict {
                self.probe_strict(pin)
                    .map(|(group, mask)| ProbeOutcome::Resolved { group, mask })
            } else {
                self.probe(pin)
            };
            match outcome {
                Ok(ProbeOutcome::Resolved { .. }) => summary.resolved += 1,
                Ok(ProbeOutcome::Ambiguous) => summary.ambiguous += 1,
                Err(e) if e.is_per_pin() => {
                    log::error!(
                        "Pin chip {} line {} ({}): {}",
                        pin.key.chip,
                        pin.key.line,
                        pin.name,
                        e
                    );
                    summary.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        log::info!(
            "Probed {} pins: {} resolved, {} ambiguous, {} failed",
            summary.probed,
            summary.resolved,
            summary.ambiguous,
            summary.failed
        );
        Ok(summary)
    }

    /// Probe, then write the pin map built from the board file `source`.
    ///
    /// Returns the summary and the number of pins written. Nothing is written
    /// when the run itself fails, including for an empty registry.
    pub fn discover(
        &mut self,
        registry: &mut PinRegistry,
        only: &[PinKey],
        source: &Path,
        output: &Path,
    ) -> Result<(ProbeSummary, usize)> {
        let summary = self.run(registry, only)?;
        let written = board::serialize(registry, source, output)?;
        Ok((summary, written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::store::parse_input_str;
    use crate::registry::{Polarity, WindowId};
    use crate::sim::{mixed_rig, Bank, SimChip, SimLines, MIXED_BOARD};
    use std::rc::Rc;

    #[test]
    fn test_first_difference() {
        assert_eq!(first_difference(&[1, 2, 3], &[1, 2, 4]), Some(2));
        assert_eq!(first_difference(&[1, 2, 3], &[0, 2, 4]), Some(0));
        assert_eq!(first_difference(&[1, 2, 3], &[1, 2, 3]), None);
        assert_eq!(first_difference(&[], &[]), None);
    }

    #[test]
    fn test_value_diff_symmetric_and_exact() {
        let samples = [0u32, 1, 0x20, 0x8000_0000, 0xffff_ffff, 0x1234_5678];
        for &a in &samples {
            for &b in &samples {
                assert_eq!(value_diff(a, b), value_diff(b, a));
            }
        }
        assert_eq!(value_diff(0, 0x20), 0x20);
        assert_eq!(value_diff(0xffff_ffff, 0x7fff_ffff), 0x8000_0000);
        assert_eq!(value_diff(0x21, 0x01), 0x20);
    }

    const TWO_CHIP_BOARD: &str = r#"description = Two chips
chips = 0x1000, 0x2000
chip.size = 0x40, 0x40
data.in.on.offset = 0x10, 0x20
data.in.off.offset = 0x10, 0x20
data.out.on.offset = 0x10, 0x20
data.out.off.offset = 0x10, 0x20
group.chip = 0, 1
group.name = G0, G1
pins = 5
pin.chip = 0
"#;

    #[test]
    fn test_discovers_shared_register_and_complement() {
        let (board, mut registry) = parse_input_str(TWO_CHIP_BOARD).unwrap();
        let chips = vec![
            SimChip::new(0x40, vec![Bank::Shared { data: 0x10 }]),
            SimChip::new(0x40, vec![Bank::Shared { data: 0x20 }]),
        ];
        chips[1].poke(0x20, 0xabcd_0000);
        let mut windows = WindowMap::new();
        for chip in &chips {
            windows.push(Rc::clone(chip));
        }
        let mut lines = SimLines::new(chips.clone()).route(PinKey::new(0, 5), 0, 0, 5);

        let pin = registry.get_mut(PinKey::new(0, 5)).unwrap();
        let outcome = Prober::new(&board, &windows, &mut lines).probe(pin).unwrap();
        assert_eq!(outcome, ProbeOutcome::Resolved { group: 0, mask: 0x20 });

        let resolved = pin.resolved().unwrap();
        assert_eq!(resolved.group, "G0");
        assert_eq!(resolved.window, WindowId(0));
        let regs = resolved.registers;
        assert_eq!(regs.out_on.offset, 0x10);
        assert_eq!(regs.out_on.mask, 0x20);
        assert_eq!(regs.out_off.offset, 0x10);
        assert_eq!(regs.out_off.mask, 0xFFFF_FFDF);
        assert_eq!(regs.out_off.polarity, Polarity::ClearViaAnd);
        assert_eq!(regs.out_on.mask & regs.out_off.mask, 0);
        assert_eq!(lines.released(), 1);
    }

    #[test]
    fn test_run_resolves_mixed_board() {
        let mut rig = mixed_rig();
        let summary = Prober::new(&rig.board, &rig.windows, &mut rig.lines)
            .run(&mut rig.registry, &[])
            .unwrap();

        assert_eq!(
            summary,
            ProbeSummary {
                probed: 4,
                resolved: 3,
                ambiguous: 1,
                failed: 0
            }
        );

        let pb = rig.registry.get(PinKey::new(0, 20)).unwrap().resolved().unwrap();
        assert_eq!(pb.group, "PB");
        assert_eq!(pb.registers.in_on.offset, 0x34);
        assert_eq!(pb.registers.out_on.mask, 1 << 20);

        // Dedicated set/clear registers: both masks assert with OR
        let pl = rig.registry.get(PinKey::new(1, 5)).unwrap().resolved().unwrap();
        assert_eq!(pl.group, "PL");
        assert_eq!(pl.window, WindowId(1));
        assert_eq!(pl.registers.out_on.offset, 0x1c);
        assert_eq!(pl.registers.out_off.offset, 0x28);
        assert_eq!(pl.registers.out_off.mask, 1 << 5);
        assert_eq!(pl.registers.out_off.polarity, Polarity::Assert);

        // Unwired line: skipped, everything released
        assert!(!rig.registry.get(PinKey::new(1, 7)).unwrap().is_resolved());
        assert_eq!(rig.lines.opened(), 4);
        assert_eq!(rig.lines.released(), 4);
    }

    #[test]
    fn test_output_sampling_cannot_see_set_registers() {
        let mut rig = mixed_rig();
        rig.board.use_input_register = false;
        let mut prober = Prober::new(&rig.board, &rig.windows, &mut rig.lines);

        let pa = rig.registry.get_mut(PinKey::new(0, 3)).unwrap();
        assert!(matches!(
            prober.probe(pa).unwrap(),
            ProbeOutcome::Resolved { group: 0, mask: 0x8 }
        ));

        let pl = rig.registry.get_mut(PinKey::new(1, 5)).unwrap();
        assert_eq!(prober.probe(pl).unwrap(), ProbeOutcome::Ambiguous);
        assert!(!pl.is_resolved());
    }

    #[test]
    fn test_hardware_failure_does_not_stop_run() {
        let mut rig = mixed_rig();
        let mut lines = std::mem::take(&mut rig.lines).broken(PinKey::new(0, 3));
        let summary = Prober::new(&rig.board, &rig.windows, &mut lines)
            .run(&mut rig.registry, &[])
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.resolved, 2);
        assert_eq!(summary.ambiguous, 1);
        assert!(!rig.registry.get(PinKey::new(0, 3)).unwrap().is_resolved());
    }

    #[test]
    fn test_out_of_bounds_candidate_is_per_pin() {
        let text = TWO_CHIP_BOARD
            .replace("data.in.on.offset = 0x10, 0x20", "data.in.on.offset = 0x10, 0x40")
            .replace("data.out.on.offset = 0x10, 0x20", "data.out.on.offset = 0x10, 0x40");
        let (board, mut registry) = parse_input_str(&text).unwrap();
        let chip = SimChip::new(0x40, vec![Bank::Shared { data: 0x10 }]);
        let mut windows = WindowMap::new();
        windows.push(Rc::clone(&chip));
        windows.push(SimChip::new(0x40, vec![]));
        let mut lines = SimLines::new(vec![chip]).route(PinKey::new(0, 5), 0, 0, 5);

        let summary = Prober::new(&board, &windows, &mut lines)
            .run(&mut registry, &[])
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(lines.released(), 1);
    }

    #[test]
    fn test_filter_probes_single_pin() {
        let mut rig = mixed_rig();
        let summary = Prober::new(&rig.board, &rig.windows, &mut rig.lines)
            .run(&mut rig.registry, &[PinKey::new(1, 5)])
            .unwrap();
        assert_eq!(summary.probed, 1);
        assert_eq!(rig.registry.resolved_count(), 1);

        let err = Prober::new(&rig.board, &rig.windows, &mut rig.lines)
            .run(&mut rig.registry, &[PinKey::new(9, 9)])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownPin(_)));
    }

    #[test]
    fn test_strict_run_counts_ambiguity_as_failure() {
        let mut rig = mixed_rig();
        let summary = Prober::new(&rig.board, &rig.windows, &mut rig.lines)
            .strict(true)
            .run(&mut rig.registry, &[])
            .unwrap();
        assert_eq!(summary.resolved, 3);
        assert_eq!(summary.ambiguous, 0);
        assert_eq!(summary.failed, 1);

        let mut prober = Prober::new(&rig.board, &rig.windows, &mut rig.lines);
        let pl7 = rig.registry.get_mut(PinKey::new(1, 7)).unwrap();
        assert!(matches!(
            prober.probe_strict(pl7),
            Err(Error::ProbeAmbiguity { key }) if key == PinKey::new(1, 7)
        ));
    }

    /// Drives every bit of one word, like a port-wide latch
    struct WordLines {
        chip: Rc<SimChip>,
        offset: usize,
    }

    struct WordLine(Rc<SimChip>, usize);

    impl OutputLine for WordLine {
        fn set_value(&mut self, value: bool) -> Result<()> {
            self.0.poke(self.1, if value { u32::MAX } else { 0 });
            Ok(())
        }
    }

    impl LineProvider for WordLines {
        type Line = WordLine;

        fn request_output(&mut self, _key: PinKey) -> Result<WordLine> {
            Ok(WordLine(Rc::clone(&self.chip), self.offset))
        }
    }

    #[test]
    fn test_full_word_change_on_shared_register_is_ambiguous() {
        let (board, mut registry) = parse_input_str(TWO_CHIP_BOARD).unwrap();
        let chip = SimChip::new(0x40, vec![Bank::Shared { data: 0x10 }]);
        let mut windows = WindowMap::new();
        windows.push(Rc::clone(&chip));
        windows.push(SimChip::new(0x40, vec![]));
        let mut lines = WordLines { chip, offset: 0x10 };

        let pin = registry.get_mut(PinKey::new(0, 5)).unwrap();
        let outcome = Prober::new(&board, &windows, &mut lines).probe(pin).unwrap();
        assert_eq!(outcome, ProbeOutcome::Ambiguous);
        assert!(!pin.is_resolved());

        let summary = Prober::new(&board, &windows, &mut lines)
            .strict(true)
            .run(&mut registry, &[])
            .unwrap();
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_discover_writes_resolved_pins_only() {
        let mut rig = mixed_rig();
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("board.txt");
        let output = dir.path().join("pins.txt");
        std::fs::write(&source, MIXED_BOARD).unwrap();

        let (summary, written) = Prober::new(&rig.board, &rig.windows, &mut rig.lines)
            .discover(&mut rig.registry, &[], &source, &output)
            .unwrap();
        assert_eq!(summary.ambiguous, 1);
        assert_eq!(written, 3);

        let text = std::fs::read_to_string(&output).unwrap();
        assert!(text.contains("pin.0.3 = PA, PA3"));
        assert!(text.contains("pin.0.20 = PB, PB20"));
        assert!(text.contains("pin.1.5 = PL, PL5"));
        assert!(!text.contains("pin.1.7"));
    }

    #[test]
    fn test_discover_with_empty_registry_writes_nothing() {
        let mut rig = mixed_rig();
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("board.txt");
        let output = dir.path().join("pins.txt");
        std::fs::write(&source, MIXED_BOARD).unwrap();

        let mut empty = PinRegistry::new();
        let err = Prober::new(&rig.board, &rig.windows, &mut rig.lines)
            .discover(&mut empty, &[], &source, &output)
            .unwrap_err();
        assert!(matches!(err, Error::EmptyRegistry));
        assert!(!output.exists());
        assert_eq!(rig.lines.opened(), 0);
    }

    #[test]
    fn test_empty_registry_is_fatal() {
        let mut rig = mixed_rig();
        let mut empty = PinRegistry::new();
        let err = Prober::new(&rig.board, &rig.windows, &mut rig.lines)
            .run(&mut empty, &[])
            .unwrap_err();
        assert!(matches!(err, Error::EmptyRegistry));
        assert_eq!(rig.lines.opened(), 0);
    }
}
