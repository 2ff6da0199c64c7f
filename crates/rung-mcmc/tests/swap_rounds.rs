use proptest::prelude::*;
use rung_core::{RngHandle, Sample};

use rung_mcmc::exchange::{eligible_pairs, resolve_round};
use rung_mcmc::tempering::{init_ladder, swap_accepted, swap_log_acceptance};

fn tagged(log_likelihoods: &[f64]) -> Vec<Sample> {
    log_likelihoods
        .iter()
        .enumerate()
        .map(|(tag, ll)| Sample::new(vec![tag as f64], *ll, 0.0))
        .collect()
}

fn tags(samples: &[Sample]) -> Vec<usize> {
    samples.iter().map(|sample| sample.point[0] as usize).collect()
}

#[test]
fn pairs_alternate_parity_hottest_first() {
    assert_eq!(eligible_pairs(0, 5).collect::<Vec<_>>(), vec![2, 0]);
    assert_eq!(eligible_pairs(1, 5).collect::<Vec<_>>(), vec![3, 1]);
    assert_eq!(eligible_pairs(7, 2).count(), 0);
    assert_eq!(eligible_pairs(8, 2).collect::<Vec<_>>(), vec![0]);
    assert_eq!(eligible_pairs(0, 1).count(), 0);
}

#[test]
fn equal_log_likelihoods_never_swap() {
    let log_acceptance = swap_log_acceptance(1.0, 0.5, -3.0, -3.0);
    assert_eq!(log_acceptance, 0.0);
    assert!(!swap_accepted(log_acceptance, -3.0, -3.0, f64::NEG_INFINITY));

    let mut rng = RngHandle::from_seed(11);
    for iteration in 0..200 {
        let resolution = resolve_round(
            iteration * 2,
            &[1.0, 0.5],
            tagged(&[-3.0, -3.0]),
            1.0,
            &mut rng,
        );
        assert_eq!(tags(&resolution.samples), vec![0, 1]);
        assert!(resolution.pairs.iter().all(|pair| pair.proposed && !pair.accepted));
    }
}

#[test]
fn favourable_swap_is_always_accepted() {
    let log_acceptance = swap_log_acceptance(1.0, 0.5, -10.0, -1.0);
    assert!((log_acceptance - 4.5).abs() < 1e-12);

    let mut rng = RngHandle::from_seed(3);
    let resolution = resolve_round(0, &[1.0, 0.5], tagged(&[-10.0, -1.0]), 1.0, &mut rng);
    assert_eq!(tags(&resolution.samples), vec![1, 0]);

    let outcomes = resolution.into_outcomes(0);
    assert_eq!(outcomes[0].sample.log_likelihood, -1.0);
    assert!(outcomes[0].proposed && outcomes[0].accepted);
    assert!(outcomes[0].upper_proposed && outcomes[0].upper_accepted);
    assert!(outcomes[1].proposed && outcomes[1].accepted);
    assert!(!outcomes[1].upper_proposed && !outcomes[1].upper_accepted);
}

#[test]
fn acceptance_frequency_matches_the_rule() {
    // delta = (1 - 0.5) * (-1 - (-1 + 2 ln 2)) = -ln 2, so half the proposals pass.
    let cold = -1.0 + 2.0 * 2f64.ln();
    let mut rng = RngHandle::from_seed(0xC0FFEE);
    let mut accepted = 0;
    for round in 0..4000 {
        let input = tagged(&[cold, -1.0]);
        let resolution = resolve_round(round * 2, &[1.0, 0.5], input, 1.0, &mut rng);
        if resolution.pairs[0].accepted {
            accepted += 1;
        }
    }
    assert!((1800..=2200).contains(&accepted), "accepted {accepted} of 4000");
}

#[test]
fn zero_probability_proposes_nothing() {
    let (_, betas) = init_ladder(2, 6, Some(30.0)).unwrap();
    let mut rng = RngHandle::from_seed(5);
    for iteration in 0..50 {
        let input = tagged(&[-50.0, -40.0, -30.0, -20.0, -10.0, 0.0]);
        let resolution = resolve_round(iteration, &betas, input, 0.0, &mut rng);
        assert_eq!(tags(&resolution.samples), vec![0, 1, 2, 3, 4, 5]);
        assert!(resolution.pairs.iter().all(|pair| !pair.proposed));
        let outcomes = resolution.into_outcomes(iteration);
        assert!(outcomes.iter().all(|outcome| !outcome.proposed));
    }
}

#[test]
fn proposal_probability_thins_eligible_pairs() {
    let mut rng = RngHandle::from_seed(21);
    let mut proposed = 0;
    for round in 0..2000 {
        let input = tagged(&[-2.0, -1.0]);
        let resolution = resolve_round(round * 2, &[1.0, 0.5], input, 0.25, &mut rng);
        proposed += resolution.pairs.iter().filter(|pair| pair.proposed).count();
    }
    assert!((400..=600).contains(&proposed), "proposed {proposed} of 2000");
}

proptest! {
    #[test]
    fn rounds_permute_states_between_eligible_neighbours(
        log_likelihoods in proptest::collection::vec(-100.0f64..0.0, 2..10),
        iteration in 0usize..1000,
        p_swap in 0.0f64..=1.0,
        seed in any::<u64>(),
    ) {
        let n = log_likelihoods.len();
        let (_, betas) = init_ladder(3, n, Some(50.0)).unwrap();
        let mut rng = RngHandle::from_seed(seed);
        let input = tagged(&log_likelihoods);
        let resolution = resolve_round(iteration, &betas, input, p_swap, &mut rng);

        let after = tags(&resolution.samples);
        let mut sorted = after.clone();
        sorted.sort_unstable();
        prop_assert_eq!(sorted, (0..n).collect::<Vec<_>>());

        for (chain, tag) in after.iter().enumerate() {
            if *tag != chain {
                let lower = chain.min(*tag);
                prop_assert_eq!(chain.abs_diff(*tag), 1);
                prop_assert_eq!(lower % 2, iteration % 2);
            }
        }

        let outcomes = resolution.into_outcomes(iteration);
        let accepted_chains = outcomes.iter().filter(|outcome| outcome.accepted).count();
        let swapped_chains = after.iter().enumerate().filter(|(chain, tag)| chain != *tag).count();
        prop_assert_eq!(accepted_chains, swapped_chains);
    }
}
