//! Rewriting of `pop`, `dup` and `swap` instructions whose words are only partly present.
//!
//! A stack manipulation instruction is described by the words it removes and the words it
//! pushes back, each output being a copy of one input. Once the simplifier has decided which
//! input words will actually be on the stack and which output words are still wanted, the
//! instruction has to be replaced by a sequence that performs exactly that reduced move. The
//! sequence is found by a breadth-first search over short sequences of stack manipulation
//! opcodes, so the shortest sequence wins and the original instruction is found again when
//! nothing changed.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::assembly::{opcodes::*, Instruction, StackMove};

/// Opcodes tried, in order of preference.
const MOVES: [u8; 9] = [POP, POP2, DUP, DUP_X1, DUP_X2, DUP2, DUP2_X1, DUP2_X2, SWAP];

/// Longest replacement sequence searched for.
const MAX_SEQUENCE: usize = 3;

/// A stack word in a reduced stack move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) struct Word {
    /// Index of the input word this word is a copy of
    pub source: usize,
    /// Upper half of a `long` or `double`
    pub upper: bool,
}

/// Finds the shortest instruction sequence that turns `inputs` into `outputs` (both bottom
/// to top) without touching the words below `inputs` or splitting a category-2 value.
///
/// Returns an empty sequence if nothing has to move and `None` if no sequence of at most
/// three instructions exists.
pub(super) fn solve(inputs: &[Word], outputs: &[Word]) -> Option<Vec<Instruction>> {
    if inputs == outputs {
        return Some(Vec::new());
    }

    let mut seen = FxHashSet::default();
    seen.insert(inputs.to_vec());
    let mut queue = VecDeque::from([(inputs.to_vec(), Vec::new())]);

    while let Some((words, sequence)) = queue.pop_front() {
        if sequence.len() == MAX_SEQUENCE {
            continue;
        }
        for opcode in MOVES {
            let Some(movement) = StackMove::of(opcode) else {
                continue;
            };
            if !movement.fits(&words, |word| word.upper) {
                continue;
            }
            let base = words.len() - movement.pops;
            let mut next = words[..base].to_vec();
            next.extend(movement.outputs.iter().map(|&source| words[base + source]));

            let mut extended = sequence.clone();
            extended.push(opcode);
            if next == outputs {
                return Some(extended.into_iter().map(Instruction::simple).collect());
            }
            if seen.insert(next.clone()) {
                queue.push_back((next, extended));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(sources: &[usize]) -> Vec<Word> {
        sources
            .iter()
            .map(|&source| Word {
                source,
                upper: false,
            })
            .collect()
    }

    fn opcodes(sequence: Option<Vec<Instruction>>) -> Option<Vec<u8>> {
        sequence.map(|s| s.iter().map(|i| i.opcode).collect())
    }

    #[test]
    fn test_unchanged_moves_are_found_again() {
        assert_eq!(
            opcodes(solve(&words(&[0]), &words(&[0, 0]))),
            Some(vec![DUP])
        );
        assert_eq!(
            opcodes(solve(&words(&[0, 1]), &words(&[1, 0, 1]))),
            Some(vec![DUP_X1])
        );
        assert_eq!(opcodes(solve(&words(&[0, 1]), &words(&[]))), Some(vec![POP2]));
    }

    #[test]
    fn test_partial_moves() {
        // dup whose second copy is unused
        assert_eq!(opcodes(solve(&words(&[0]), &words(&[0]))), Some(vec![]));
        // dup_x1 whose top copy is unused
        assert_eq!(
            opcodes(solve(&words(&[0, 1]), &words(&[1, 0]))),
            Some(vec![SWAP])
        );
        // dup_x1 whose bottom input is gone
        assert_eq!(
            opcodes(solve(&words(&[1]), &words(&[1, 1]))),
            Some(vec![DUP])
        );
        // pop2 over two single words of which only one is present
        assert_eq!(opcodes(solve(&words(&[1]), &words(&[]))), Some(vec![POP]));
    }

    #[test]
    fn test_category2_values_are_never_split() {
        let inputs = [
            Word {
                source: 0,
                upper: false,
            },
            Word {
                source: 1,
                upper: false,
            },
            Word {
                source: 2,
                upper: true,
            },
        ];
        let outputs = [inputs[1], inputs[2], inputs[0]];
        assert_eq!(
            opcodes(solve(&inputs, &outputs)),
            Some(vec![DUP2_X1, POP2])
        );
    }

    #[test]
    fn test_unreachable_shapes() {
        // three instructions add at most five copies of a single word
        assert_eq!(solve(&words(&[0]), &words(&[0; 7])), None);
    }
}
