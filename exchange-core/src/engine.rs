//! Assignment drawing: who gives their gift to whom, and in which order the
//! pairs are revealed.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::{Assignment, ExchangeError, GiftSubmission, Participant};

/// Resampling budget for [`assign`]. The expected number of draws is about e,
/// so running out is vanishingly rare for n >= 2.
pub const MAX_DERANGEMENT_ATTEMPTS: usize = 100;

/// Pairs every participant that submitted a gift with a receiver other than
/// themselves. Givers keep roster order; the output is in pairing order.
pub fn assign<R: Rng + ?Sized>(
    participants: &[Participant],
    gifts: &[GiftSubmission],
    rng: &mut R,
) -> Result<Vec<Assignment>, ExchangeError> {
    let givers = participants
        .iter()
        .filter_map(|p| {
            gifts
                .iter()
                .find(|g| g.giver_id == p.id)
                .map(|gift| (p, gift))
        })
        .collect::<Vec<_>>();

    if givers.len() < 2 {
        return Err(ExchangeError::InsufficientParticipants);
    }

    let ids = givers.iter().map(|(p, _)| p.id.as_str()).collect::<Vec<_>>();
    let receivers = derange(&ids, rng, MAX_DERANGEMENT_ATTEMPTS)?;

    Ok(givers
        .iter()
        .zip(receivers)
        .map(|((giver, gift), receiver)| Assignment {
            id: format!("exchange_{}_{}", giver.id, receiver),
            giver_id: giver.id.clone(),
            receiver_id: receiver.to_string(),
            gift_id: gift.id.clone(),
            revealed_at: None,
        })
        .collect())
}

/// Independent shuffle deciding the reveal order, so the sequence on screen
/// says nothing about roster or pairing order.
pub fn shuffle_order<R: Rng + ?Sized>(
    mut assignments: Vec<Assignment>,
    rng: &mut R,
) -> Vec<Assignment> {
    assignments.shuffle(rng);
    assignments
}

/// Reject-and-resample: uniform over derangements because each accepted draw
/// is a uniform permutation conditioned on having no fixed point.
fn derange<T, R>(items: &[T], rng: &mut R, max_attempts: usize) -> Result<Vec<T>, ExchangeError>
where
    T: Clone + PartialEq,
    R: Rng + ?Sized,
{
    if items.len() < 2 {
        return Err(ExchangeError::InsufficientParticipants);
    }

    let mut candidate = items.to_vec();
    for _ in 0..max_attempts {
        candidate.shuffle(rng);
        if is_derangement(items, &candidate) {
            return Ok(candidate);
        }
    }

    Err(ExchangeError::DerangementUnobtainable)
}

fn is_derangement<T: PartialEq>(original: &[T], candidate: &[T]) -> bool {
    original.iter().zip(candidate).all(|(a, b)| a != b)
}

/// Checks that `assignments` is a fixed-point-free bijection over exactly the
/// participants in `participants` that submitted, each giving their own gift.
pub fn validate(
    participants: &[Participant],
    gifts: &[GiftSubmission],
    assignments: &[Assignment],
) -> Result<(), ExchangeError> {
    let submitters = participants
        .iter()
        .filter(|p| gifts.iter().any(|g| g.giver_id == p.id))
        .collect::<Vec<_>>();

    if assignments.len() != submitters.len() {
        return Err(ExchangeError::InvalidAssignments(format!(
            "expected {} assignments, got {}",
            submitters.len(),
            assignments.len()
        )));
    }

    for p in &submitters {
        let as_giver = assignments.iter().filter(|a| a.giver_id == p.id).count();
        let as_receiver = assignments.iter().filter(|a| a.receiver_id == p.id).count();
        if as_giver != 1 || as_receiver != 1 {
            return Err(ExchangeError::InvalidAssignments(format!(
                "participant {} gives {as_giver} and receives {as_receiver}",
                p.id
            )));
        }
    }

    for a in assignments {
        if a.giver_id == a.receiver_id {
            return Err(ExchangeError::InvalidAssignments(format!(
                "participant {} would receive their own gift",
                a.giver_id
            )));
        }
        let owns_gift = gifts
            .iter()
            .any(|g| g.id == a.gift_id && g.giver_id == a.giver_id);
        if !owns_gift {
            return Err(ExchangeError::InvalidAssignments(format!(
                "gift {} does not belong to {}",
                a.gift_id, a.giver_id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ready_room;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::{HashMap, HashSet};

    #[test]
    fn assignments_form_a_derangement_for_many_sizes() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
        for n in 2..=names.len() {
            let room = ready_room(&names[..n]);
            for _ in 0..50 {
                let assignments = assign(&room.participants, &room.gifts, &mut rng).unwrap();
                assert_eq!(assignments.len(), n);
                assert!(assignments.iter().all(|a| a.giver_id != a.receiver_id));
                let givers: HashSet<_> = assignments.iter().map(|a| &a.giver_id).collect();
                let receivers: HashSet<_> =
                    assignments.iter().map(|a| &a.receiver_id).collect();
                assert_eq!(givers.len(), n);
                assert_eq!(receivers.len(), n);
                validate(&room.participants, &room.gifts, &assignments).unwrap();
            }
        }
    }

    #[test]
    fn single_contributor_is_rejected() {
        let room = ready_room(&["solo"]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..10 {
            assert_eq!(
                assign(&room.participants, &room.gifts, &mut rng).unwrap_err(),
                ExchangeError::InsufficientParticipants
            );
        }
    }

    #[test]
    fn participants_without_gifts_are_left_out() {
        let mut room = ready_room(&["a", "b", "c"]);
        room.gifts.retain(|g| g.giver_id != "c");
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let assignments = assign(&room.participants, &room.gifts, &mut rng).unwrap();
        assert_eq!(assignments.len(), 2);
        assert!(assignments
            .iter()
            .all(|a| a.giver_id != "c" && a.receiver_id != "c"));
    }

    #[test]
    fn exhausted_budget_reports_unobtainable() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(
            derange(&["a", "b", "c"], &mut rng, 0).unwrap_err(),
            ExchangeError::DerangementUnobtainable
        );
    }

    #[test]
    fn seeded_draws_are_reproducible() {
        let room = ready_room(&["a", "b", "c", "d"]);
        let first = assign(
            &room.participants,
            &room.gifts,
            &mut ChaCha8Rng::seed_from_u64(42),
        )
        .unwrap();
        let second = assign(
            &room.participants,
            &room.gifts,
            &mut ChaCha8Rng::seed_from_u64(42),
        )
        .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn both_three_person_derangements_are_equally_likely() {
        let room = ready_room(&["a", "b", "c"]);
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        let trials = 6000;
        let mut counts: HashMap<Vec<String>, usize> = HashMap::new();
        for _ in 0..trials {
            let assignments = assign(&room.participants, &room.gifts, &mut rng).unwrap();
            let receivers = assignments.into_iter().map(|a| a.receiver_id).collect();
            *counts.entry(receivers).or_default() += 1;
        }
        assert_eq!(counts.len(), 2);
        for count in counts.values() {
            assert!(
                (2700..=3300).contains(count),
                "skewed derangement frequency: {counts:?}"
            );
        }
    }

    #[test]
    fn reveal_order_is_a_uniform_permutation() {
        let room = ready_room(&["a", "b", "c", "d"]);
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let base = assign(&room.participants, &room.gifts, &mut rng).unwrap();
        let trials = 8000;
        let mut occupancy: HashMap<(usize, String), usize> = HashMap::new();
        for _ in 0..trials {
            let order = shuffle_order(base.clone(), &mut rng);
            let mut sorted = order.clone();
            sorted.sort_by(|a, b| a.id.cmp(&b.id));
            let mut expected = base.clone();
            expected.sort_by(|a, b| a.id.cmp(&b.id));
            assert_eq!(sorted, expected);
            for (pos, a) in order.into_iter().enumerate() {
                *occupancy.entry((pos, a.id)).or_default() += 1;
            }
        }
        assert_eq!(occupancy.len(), 16);
        for count in occupancy.values() {
            assert!((1700..=2300).contains(count), "position bias: {count}");
        }
    }

    #[test]
    fn validate_rejects_self_pairing_and_foreign_gifts() {
        let room = ready_room(&["a", "b"]);
        let pair = |giver: &str, receiver: &str, gift: &str| Assignment {
            id: format!("exchange_{giver}_{receiver}"),
            giver_id: giver.into(),
            receiver_id: receiver.into(),
            gift_id: gift.into(),
            revealed_at: None,
        };

        let selfish = vec![pair("a", "a", "g-a"), pair("b", "b", "g-b")];
        assert!(matches!(
            validate(&room.participants, &room.gifts, &selfish),
            Err(ExchangeError::InvalidAssignments(_))
        ));

        let swapped_gifts = vec![pair("a", "b", "g-b"), pair("b", "a", "g-a")];
        assert!(matches!(
            validate(&room.participants, &room.gifts, &swapped_gifts),
            Err(ExchangeError::InvalidAssignments(_))
        ));

        let short = vec![pair("a", "b", "g-a")];
        assert!(matches!(
            validate(&room.participants, &room.gifts, &short),
            Err(ExchangeError::InvalidAssignments(_))
        ));

        let good = vec![pair("a", "b", "g-a"), pair("b", "a", "g-b")];
        assert!(validate(&room.participants, &room.gifts, &good).is_ok());
    }
}
