use rung_core::{
    ChainKernel, HistoryRow, Ladder, PtError, ProposalKind, ProposalTable, ProposalWeight,
    RngHandle, Sample, StepContext, StepOutcome,
};

/// Kernel that never moves; exercises the default hook implementations.
struct Frozen;

impl ChainKernel for Frozen {
    fn full_step(
        &mut self,
        _ctx: &StepContext<'_>,
        current: &Sample,
        _rng: &mut RngHandle,
    ) -> Result<StepOutcome, PtError> {
        Ok(StepOutcome {
            sample: current.clone(),
            kind: ProposalKind::Gaussian,
            accepted: false,
        })
    }
}

#[test]
fn default_hooks_are_no_ops() {
    let mut kernel = Frozen;
    let history = vec![HistoryRow {
        point: vec![0.0],
        log_likelihood: -1.0,
    }];
    assert!(kernel.update_covariance(&history).is_ok());
    assert!(kernel.update_modes(&history).is_ok());
    assert!(kernel.update_density_estimate(&history).is_ok());
    kernel.accept_history(&Sample::new(vec![0.0], -1.0, 0.0));
    assert!(kernel.proposal_stats().is_empty());

    let ladder = Ladder::new(vec![1.0, 0.5], 2.0).unwrap();
    let ctx = StepContext {
        iteration: 0,
        chain: 0,
        beta: 1.0,
        ladder: &ladder,
    };
    let current = Sample::new(vec![0.25], -0.5, 0.0);
    let mut rng = RngHandle::from_seed(1);
    let outcome = kernel.full_step(&ctx, &current, &mut rng).unwrap();
    assert_eq!(outcome.sample, current);
}

#[test]
fn proposal_table_normalises_and_drops_zero_weights() {
    let table = ProposalTable::new(&[
        ProposalWeight {
            kind: ProposalKind::PriorDraw,
            weight: 1.0,
        },
        ProposalWeight {
            kind: ProposalKind::Gaussian,
            weight: 3.0,
        },
        ProposalWeight {
            kind: ProposalKind::Scam,
            weight: 0.0,
        },
    ])
    .unwrap();
    assert_eq!(table.entries().len(), 2);
    assert!((table.entries()[1].weight - 0.75).abs() < 1e-12);
    assert!(!table.contains(ProposalKind::Scam));

    let mut rng = RngHandle::from_seed(5);
    let gaussian = (0..4000)
        .filter(|_| table.choose(&mut rng) == ProposalKind::Gaussian)
        .count();
    assert!((2800..3200).contains(&gaussian), "gaussian picked {gaussian} times");
}

#[test]
fn proposal_table_rejects_empty_weights() {
    assert!(matches!(
        ProposalTable::new(&[]),
        Err(PtError::InvalidConfig(_))
    ));
    let negative = ProposalTable::new(&[
        ProposalWeight {
            kind: ProposalKind::Gaussian,
            weight: 2.0,
        },
        ProposalWeight {
            kind: ProposalKind::Scam,
            weight: -1.0,
        },
    ]);
    assert!(negative.is_err());
}
