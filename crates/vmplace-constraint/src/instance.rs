//! A verification problem: a model, constraints and an optional objective.

use tracing::{info, warn};
use vmplace_core::Model;
use vmplace_plan::ReconfigurationPlan;

use crate::constraint::Constraint;
use crate::error::{CheckError, CheckResult, ConstraintError, ConstraintResult};
use crate::objective::Objective;
use crate::plan_checker::ReconfigurationPlanChecker;

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    model: Model,
    constraints: Vec<Constraint>,
    objective: Option<Objective>,
}

impl Instance {
    /// Assemble an instance. Every constraint is validated and every
    /// resource view a constraint reads must be attached to the model.
    pub fn new(
        model: Model,
        constraints: Vec<Constraint>,
        objective: Option<Objective>,
    ) -> ConstraintResult<Self> {
        for c in &constraints {
            c.validate()?;
            if let Some(id) = c.resource_id() {
                if model.resource(id).is_none() {
                    return Err(ConstraintError::MissingView {
                        constraint: c.to_string(),
                        view: id.to_string(),
                    });
                }
            }
        }
        Ok(Self {
            model,
            constraints,
            objective,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> Option<Objective> {
        self.objective
    }

    /// Check a plan against every constraint of the instance. The plan must
    /// start from the instance model.
    pub fn verify(&self, plan: &ReconfigurationPlan) -> CheckResult<()> {
        if plan.origin() != &self.model {
            warn!("plan origin differs from the instance model");
            return Err(CheckError::ForeignOrigin);
        }
        info!(
            constraints = self.constraints.len(),
            actions = plan.size(),
            "verifying plan"
        );
        let mut chk = ReconfigurationPlanChecker::new();
        for c in &self.constraints {
            chk.add_constraint(c);
        }
        chk.check(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{Ban, Preserve, ResourceCapacity};
    use vmplace_core::{Node, ShareableResource, Vm};
    use vmplace_plan::Action;

    fn make_model() -> Model {
        let mut mo = Model::new();
        let map = mo.mapping_mut();
        map.add_online_node(Node::new(1));
        map.add_online_node(Node::new(2));
        map.add_running_vm(Vm::new(1), Node::new(1)).unwrap();
        mo.attach(ShareableResource::with_defaults("cpu", 8, 1));
        mo
    }

    #[test]
    fn missing_view_is_a_configuration_error() {
        let c = ResourceCapacity::new([Node::new(1)], "mem", 4).unwrap();
        let err = Instance::new(make_model(), vec![c.into()], None).unwrap_err();
        assert!(matches!(err, ConstraintError::MissingView { ref view, .. } if view == "mem"));

        let ok = Preserve::new(Vm::new(1), "cpu", 1).unwrap();
        assert!(Instance::new(make_model(), vec![ok.into()], Some(Objective::MinMttr)).is_ok());
    }

    #[test]
    fn verify_reports_the_violated_constraint() {
        let ban = Ban::new(Vm::new(1), [Node::new(2)]);
        let inst = Instance::new(make_model(), vec![ban.clone().into()], None).unwrap();
        let mut p = ReconfigurationPlan::new(make_model());
        p.add(Action::migrate(Vm::new(1), Node::new(1), Node::new(2), 0, 3)).unwrap();
        let err = inst.verify(&p).unwrap_err();
        assert_eq!(
            err,
            CheckError::Result {
                constraint: ban.to_string(),
            }
        );
        assert!(inst.verify(&ReconfigurationPlan::new(make_model())).is_ok());
    }

    #[test]
    fn plans_from_another_model_are_refused() {
        let inst = Instance::new(make_model(), vec![Ban::new(Vm::new(1), [Node::new(2)]).into()], None).unwrap();

        let mut other = make_model();
        other.mapping_mut().add_online_node(Node::new(3));
        let err = inst.verify(&ReconfigurationPlan::new(other)).unwrap_err();
        assert_eq!(err, CheckError::ForeignOrigin);
        assert!(!err.is_violation());
        assert_eq!(err.constraint(), None);

        let mut bare = make_model();
        bare.detach("cpu");
        assert_eq!(
            inst.verify(&ReconfigurationPlan::new(bare)),
            Err(CheckError::ForeignOrigin)
        );
    }
}
