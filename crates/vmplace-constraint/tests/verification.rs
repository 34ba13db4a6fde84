//! End-to-end verification scenarios.
//!
//! Every test builds a small model, a plan, and runs the full replay driver.
//! Run with `RUST_LOG=debug` to see which checker rejects.

use std::collections::BTreeSet;
use std::sync::Once;

use vmplace_constraint::constraint::{
    Among, Ban, Gather, Lonely, MaxOnline, ResourceCapacity, RunningCapacity, Split, Spread,
};
use vmplace_constraint::{
    CheckError, Constraint, Instance, ReconfigurationPlanChecker, SatConstraint, SatConstraintChecker,
};
use vmplace_core::{Model, Node, ShareableResource, Vm};
use vmplace_plan::{Action, Event, Hook, PlanError, ReconfigurationPlan};

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn n(i: u32) -> Node {
    Node::new(i)
}

fn v(i: u32) -> Vm {
    Vm::new(i)
}

// ── Fixtures ──────────────────────────────────────────────────────

/// n1, n2, n3 online; v1 on n1.
fn make_single_vm_model() -> Model {
    let mut mo = Model::new();
    let map = mo.mapping_mut();
    for i in 1..=3 {
        map.add_online_node(n(i));
    }
    map.add_running_vm(v(1), n(1)).unwrap();
    mo
}

/// n1, n2, n3 online; v1 on n1, v2 on n2.
fn make_two_vms_model() -> Model {
    let mut mo = make_single_vm_model();
    mo.mapping_mut().add_running_vm(v(2), n(2)).unwrap();
    mo
}

fn plan_with(mo: Model, actions: Vec<Action>) -> ReconfigurationPlan {
    let mut p = ReconfigurationPlan::new(mo);
    for a in actions {
        p.add(a).unwrap();
    }
    p
}

fn verify(c: impl Into<Constraint>, p: &ReconfigurationPlan) -> Result<(), CheckError> {
    let c: Constraint = c.into();
    let mut chk = ReconfigurationPlanChecker::new();
    chk.add_constraint(&c);
    chk.check(p)
}

// ── Literal scenarios ─────────────────────────────────────────────

#[test]
fn ban_accepts_a_migration_away() {
    init_tracing();
    let p = plan_with(make_single_vm_model(), vec![Action::migrate(v(1), n(1), n(2), 0, 5)]);
    assert!(verify(Ban::new(v(1), [n(1)]), &p).is_ok());
}

#[test]
fn ban_rejects_an_empty_plan() {
    init_tracing();
    let p = ReconfigurationPlan::new(make_single_vm_model());
    let ban = Ban::new(v(1), [n(1)]);
    let err = verify(ban.clone(), &p).unwrap_err();
    assert_eq!(
        err,
        CheckError::Result {
            constraint: ban.to_string(),
        }
    );
    assert!(err.is_violation());
}

#[test]
fn continuous_spread_rejects_moving_onto_an_occupied_host() {
    init_tracing();
    let p = plan_with(
        make_two_vms_model(),
        vec![
            Action::migrate(v(2), n(2), n(3), 0, 4),
            Action::migrate(v(1), n(1), n(2), 0, 3),
        ],
    );
    let spread = Spread::new([v(1), v(2)]).with_continuous(true);
    let err = verify(spread.clone(), &p).unwrap_err();
    assert!(matches!(err, CheckError::Continuous { time: 0, .. }));
    assert_eq!(err.constraint(), Some(spread.to_string().as_str()));
    // the final placement is fine
    assert!(verify(Spread::new([v(1), v(2)]), &p).is_ok());
}

#[test]
fn running_capacity_counts_the_result() {
    init_tracing();
    let mut mo = make_single_vm_model();
    mo.mapping_mut().add_running_vm(v(2), n(1)).unwrap();
    let cap = RunningCapacity::new([n(1)], 1);

    let p = plan_with(mo.clone(), vec![Action::shutdown_vm(v(2), n(1), 0, 3)]);
    assert!(verify(cap.clone(), &p).is_ok());
    assert!(verify(cap, &ReconfigurationPlan::new(mo)).is_err());
}

// ── Properties ────────────────────────────────────────────────────

#[test]
fn ends_are_delivered_before_starts_at_the_same_instant() {
    init_tracing();
    let mut mo = make_single_vm_model();
    mo.mapping_mut().add_ready_vm(v(2));
    let p = plan_with(
        mo,
        vec![
            Action::boot_vm(v(2), n(1), 3, 5),
            Action::shutdown_vm(v(1), n(1), 0, 3),
        ],
    );
    let cap = RunningCapacity::new([n(1)], 1).with_continuous(true);
    assert!(verify(cap, &p).is_ok());
}

#[test]
fn substituted_vms_keep_their_group() {
    init_tracing();
    // groups {v1} and {v2}; v1 is renamed v10 when its first move ends
    let p = plan_with(
        make_two_vms_model(),
        vec![
            Action::migrate(v(1), n(1), n(3), 0, 2).with_event(Hook::End, Event::substituted(v(1), v(10))),
            Action::migrate(v(10), n(3), n(2), 2, 4),
        ],
    );
    let split = Split::new(vec![BTreeSet::from([v(1)]), BTreeSet::from([v(2)])])
        .unwrap()
        .with_continuous(true);
    assert!(matches!(
        verify(split.clone(), &p),
        Err(CheckError::Continuous { time: 2, .. })
    ));

    let mut chk = split.checker();
    assert!(chk.starts_with(p.origin()));
    chk.substitute_vm(v(1), v(10));
    assert_eq!(chk.base().vms(), &BTreeSet::from([v(2), v(10)]));
}

#[test]
fn empty_plans_agree_in_both_restrictions() {
    init_tracing();
    let mut crowded = make_two_vms_model();
    crowded.mapping_mut().add_running_vm(v(3), n(1)).unwrap();
    let mut rc = ShareableResource::with_defaults("cpu", 4, 1);
    rc.set_consumption(v(3), 3);
    crowded.attach(rc);

    let constraints: Vec<Constraint> = vec![
        Ban::new(v(1), [n(1)]).into(),
        Spread::new([v(1), v(3)]).into(),
        Gather::new([v(1), v(2)]).into(),
        Lonely::new([v(1)]).into(),
        RunningCapacity::new([n(1)], 1).into(),
        MaxOnline::new([n(1), n(2), n(3)], 2).into(),
        ResourceCapacity::new([n(1)], "cpu", 3).unwrap().into(),
        Among::new([v(1), v(2)], vec![BTreeSet::from([n(1)]), BTreeSet::from([n(2), n(3)])])
            .unwrap()
            .into(),
        Split::new(vec![BTreeSet::from([v(1)]), BTreeSet::from([v(3)])]).unwrap().into(),
    ];
    for mo in [make_single_vm_model(), crowded] {
        let empty = ReconfigurationPlan::new(mo.clone());
        for c in &constraints {
            let discrete = c.is_satisfied(&mo);
            let mut cont = c.clone();
            cont.set_continuous(true).unwrap();
            assert_eq!(cont.is_satisfied_by(&empty), discrete, "{c}");
            assert_eq!(c.is_satisfied_by(&empty), discrete, "{c}");
        }
    }
}

#[test]
fn among_verdicts_are_deterministic() {
    init_tracing();
    let mut mo = make_single_vm_model();
    mo.mapping_mut().add_ready_vm(v(2));
    mo.mapping_mut().add_ready_vm(v(3));
    let p = plan_with(
        mo,
        vec![
            Action::boot_vm(v(2), n(2), 0, 2),
            Action::boot_vm(v(3), n(3), 0, 2),
            Action::migrate(v(1), n(1), n(2), 1, 3),
        ],
    );
    let among = Among::new(
        [v(1), v(2), v(3)],
        vec![BTreeSet::from([n(1), n(2)]), BTreeSet::from([n(3)])],
    )
    .unwrap()
    .with_continuous(true);
    let first = verify(among.clone(), &p);
    for _ in 0..5 {
        assert_eq!(verify(among.clone(), &p), first);
    }
    assert!(first.is_err());
}

// ── Driver behavior ───────────────────────────────────────────────

#[test]
fn continuous_constraints_check_the_origin() {
    init_tracing();
    let p = plan_with(make_single_vm_model(), vec![Action::migrate(v(1), n(1), n(2), 0, 1)]);
    let err = verify(Ban::new(v(1), [n(1)]).with_continuous(true), &p).unwrap_err();
    assert!(matches!(err, CheckError::Origin { .. }));
}

#[test]
fn unapplyable_plans_are_structural_errors() {
    init_tracing();
    // v1 is not on n2
    let p = plan_with(make_single_vm_model(), vec![Action::migrate(v(1), n(2), n(3), 0, 1)]);
    let err = ReconfigurationPlanChecker::new().check(&p).unwrap_err();
    assert!(matches!(
        err,
        CheckError::Structural {
            time: 0,
            source: PlanError::Unapplyable { .. },
        }
    ));
    assert!(!err.is_violation());
    assert_eq!(err.constraint(), None);
}

#[test]
fn first_rejection_wins() {
    init_tracing();
    let p = plan_with(make_two_vms_model(), vec![Action::migrate(v(1), n(1), n(2), 0, 2)]);
    let mut chk = ReconfigurationPlanChecker::new();
    let spread = Spread::new([v(1), v(2)]).with_continuous(true);
    let ban = Ban::new(v(1), [n(2)]);
    chk.add_constraint(&ban);
    chk.add_constraint(&spread);
    assert_eq!(chk.len(), 2);
    let err = chk.check(&p).unwrap_err();
    assert_eq!(err.constraint(), Some(spread.to_string().as_str()));
}

#[test]
fn instances_survive_json() {
    init_tracing();
    let p = plan_with(make_single_vm_model(), vec![Action::migrate(v(1), n(1), n(2), 0, 5)]);
    let json = serde_json::to_string(&p).unwrap();
    let back: ReconfigurationPlan = serde_json::from_str(&json).unwrap();
    assert_eq!(back, p);

    let constraints: Vec<Constraint> = vec![Ban::new(v(1), [n(1)]).into(), Spread::new([v(1)]).into()];
    let json = serde_json::to_string(&constraints).unwrap();
    let back: Vec<Constraint> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, constraints);

    let inst = Instance::new(make_single_vm_model(), back, None).unwrap();
    assert!(inst.verify(&p).is_ok());
}
