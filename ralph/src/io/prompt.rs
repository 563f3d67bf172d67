//! Prompt rendering for iteration rounds and plan restructuring.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};

const ITERATION_TEMPLATE: &str = include_str!("prompts/iteration.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");

static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("iteration", ITERATION_TEMPLATE)
            .expect("iteration template should be valid");
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        Self { env }
    }

    fn render(&self, name: &str, plan: &str) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("load {name} template"))?;
        template
            .render(context! { plan => plan })
            .with_context(|| format!("render {name} template"))
    }
}

/// Prompt sent to the agent for one loop round.
pub fn iteration_prompt(plan: &str) -> Result<String> {
    ENGINE.render("iteration", plan)
}

/// Prompt asking the agent to restructure `plan` into atomic steps.
pub fn plan_improvement_prompt(plan: &str) -> Result<String> {
    ENGINE.render("plan", plan)
}
