use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::Config;
use crate::context::AppContext;
use crate::error::RegistryError;

use super::evaluate::EvaluateHandler;
use super::external::ExternalCommandHandler;
use super::save::SaveHandler;
use super::transform::TransformHandler;
use super::StepHandler;

/// Builds the handler for one step from the shared application context.
pub type HandlerFactory =
    Arc<dyn Fn(&AppContext) -> Result<Box<dyn StepHandler>, RegistryError> + Send + Sync>;

/// Step name to handler constructor, populated once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in steps plus one external command handler per entry in
    /// `config.external_steps`. Externals replace built-ins of the same name.
    pub fn with_builtins(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register("transform", |_| Ok(Box::new(TransformHandler)));
        registry.register("evaluate", |_| Ok(Box::new(EvaluateHandler)));
        registry.register("save", |_| Ok(Box::new(SaveHandler)));

        for (step, command) in &config.external_steps {
            let step_name = step.clone();
            let command = command.clone();
            registry.register(step, move |_| {
                Ok(Box::new(ExternalCommandHandler::new(&step_name, command.clone())))
            });
        }

        registry
    }

    /// Registers or replaces the constructor for `step`.
    pub fn register<F>(&mut self, step: &str, factory: F) -> &mut Self
    where
        F: Fn(&AppContext) -> Result<Box<dyn StepHandler>, RegistryError> + Send + Sync + 'static,
    {
        self.factories.insert(step.to_string(), Arc::new(factory));
        self
    }

    pub fn contains(&self, step: &str) -> bool {
        self.factories.contains_key(step)
    }

    pub fn step_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Checks that every configured step has a handler, so an unknown name
    /// fails at startup rather than at first dispatch.
    pub fn validate(&self, steps: &[String]) -> Result<(), RegistryError> {
        if steps.is_empty() {
            return Err(RegistryError::NoSteps);
        }

        let mut seen = HashSet::new();
        for step in steps {
            if !seen.insert(step.as_str()) {
                return Err(RegistryError::DuplicateStep(step.clone()));
            }
            if !self.contains(step) {
                return Err(RegistryError::UnknownStep(step.clone()));
            }
        }
        Ok(())
    }

    pub fn build(&self, step: &str, app: &AppContext) -> Result<Box<dyn StepHandler>, RegistryError> {
        let factory = self
            .factories
            .get(step)
            .ok_or_else(|| RegistryError::UnknownStep(step.to_string()))?;
        factory(app)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("steps", &self.step_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExternalStepConfig;
    use crate::handler::test_support::app;
    use crate::handler::{StepContext, StepError};
    use serde_json::{json, Value};

    struct Echo;

    impl StepHandler for Echo {
        fn execute(&self, ctx: &mut StepContext<'_>) -> Result<Value, StepError> {
            Ok(json!({ "step": ctx.step }))
        }
    }

    fn steps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_builtins() {
        let registry = HandlerRegistry::with_builtins(&Config::default());
        assert_eq!(registry.step_names(), vec!["evaluate", "save", "transform"]);
    }

    #[test]
    fn test_external_steps_registered() {
        let mut config = Config::default();
        config.external_steps.insert(
            "extract".into(),
            ExternalStepConfig {
                program: "extractor".into(),
                ..Default::default()
            },
        );
        let registry = HandlerRegistry::with_builtins(&config);
        assert!(registry.contains("extract"));
        assert!(!registry.contains("map"));
    }

    #[test]
    fn test_validate_fails_fast() {
        let mut registry = HandlerRegistry::new();
        registry.register("extract", |_| Ok(Box::new(Echo)));

        assert!(registry.validate(&steps(&["extract"])).is_ok());
        assert!(matches!(registry.validate(&[]), Err(RegistryError::NoSteps)));
        assert!(matches!(
            registry.validate(&steps(&["extract", "map"])),
            Err(RegistryError::UnknownStep(s)) if s == "map"
        ));
        assert!(matches!(
            registry.validate(&steps(&["extract", "extract"])),
            Err(RegistryError::DuplicateStep(s)) if s == "extract"
        ));
    }

    #[test]
    fn test_build() {
        let (_dir, app) = app();
        let mut registry = HandlerRegistry::new();
        registry.register("extract", |_| Ok(Box::new(Echo)));

        let handler = registry.build("extract", &app).unwrap();
        let mut state = crate::pipeline::PipelineState::new("p1", steps(&["extract"]));
        let mut ctx = StepContext::new("extract", &app, &mut state);
        assert_eq!(handler.execute(&mut ctx).unwrap(), json!({"step": "extract"}));

        assert!(matches!(
            registry.build("nope", &app),
            Err(RegistryError::UnknownStep(_))
        ));
    }
}
