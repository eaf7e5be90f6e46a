//! Simulated user classes.
//!
//! A user class bundles the task mix, wait time and startup behaviour shared
//! by every simulated user of one kind. The runner spawns users of each class
//! in proportion to the class weights.

use thiserror::Error;

use crate::selector::{SelectorError, WeightedSelector};
use crate::task::{RequestSpec, StartupCheck, TaskDef, VariablePools};
use crate::wait_time::WaitTime;

/// Errors raised when a user class definition is inconsistent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("User class '{0}' has no tasks")]
    NoTasks(String),

    #[error("User class '{class}' task '{task}' has zero weight")]
    ZeroTaskWeight { class: String, task: String },

    #[error("User class '{0}' has zero weight")]
    ZeroClassWeight(String),

    #[error("User class '{class}' uses variable '{variable}' in '{path}' but defines no values for it")]
    UndefinedVariable {
        class: String,
        variable: String,
        path: String,
    },

    #[error("No user classes defined")]
    NoClasses,

    #[error("Duplicate user class name '{0}'")]
    DuplicateClass(String),

    #[error("Task selection for '{class}' failed: {source}")]
    Selector {
        class: String,
        #[source]
        source: SelectorError,
    },
}

/// A kind of simulated user.
#[derive(Debug, Clone)]
pub struct UserClass {
    pub name: String,

    /// Relative share of spawned users
    pub weight: u32,

    /// Exact number of users of this class, taken before weights apply
    pub fixed_count: Option<usize>,

    pub wait_time: WaitTime,

    pub on_start: Option<StartupCheck>,

    pub variables: VariablePools,

    pub tasks: Vec<TaskDef>,
}

impl UserClass {
    /// Check that tasks, weights and path variables are consistent.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.tasks.is_empty() {
            return Err(ProfileError::NoTasks(self.name.clone()));
        }
        if self.weight == 0 && self.fixed_count.is_none() {
            return Err(ProfileError::ZeroClassWeight(self.name.clone()));
        }

        for task in &self.tasks {
            if task.weight == 0 {
                return Err(ProfileError::ZeroTaskWeight {
                    class: self.name.clone(),
                    task: task.name.clone(),
                });
            }
            self.check_variables(&task.request)?;
        }

        if let Some(check) = &self.on_start {
            self.check_variables(&check.request)?;
        }

        Ok(())
    }

    fn check_variables(&self, request: &RequestSpec) -> Result<(), ProfileError> {
        for variable in request.path.placeholders() {
            let defined = self
                .variables
                .get(variable)
                .is_some_and(|values| !values.is_empty());
            if !defined {
                return Err(ProfileError::UndefinedVariable {
                    class: self.name.clone(),
                    variable: variable.to_string(),
                    path: request.path.as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Build the weighted task picker for users of this class.
    pub fn task_selector(&self) -> Result<WeightedSelector<TaskDef>, ProfileError> {
        WeightedSelector::new(
            self.tasks
                .iter()
                .map(|task| (task.clone(), task.weight))
                .collect(),
        )
        .map_err(|source| ProfileError::Selector {
            class: self.name.clone(),
            source,
        })
    }
}

/// Validate a full set of user classes.
pub fn validate_classes(classes: &[UserClass]) -> Result<(), ProfileError> {
    if classes.is_empty() {
        return Err(ProfileError::NoClasses);
    }

    let mut seen = std::collections::HashSet::new();
    for class in classes {
        if !seen.insert(class.name.as_str()) {
            return Err(ProfileError::DuplicateClass(class.name.clone()));
        }
        class.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn simple_class() -> UserClass {
        UserClass {
            name: "Reader".to_string(),
            weight: 1,
            fixed_count: None,
            wait_time: WaitTime::constant(Duration::from_millis(10)),
            on_start: None,
            variables: VariablePools::new(),
            tasks: vec![TaskDef::new(
                "menus",
                1,
                RequestSpec::get("/api/v2/menus").unwrap(),
            )],
        }
    }

    #[test]
    fn test_valid_class() {
        assert!(simple_class().validate().is_ok());
    }

    #[test]
    fn test_no_tasks_rejected() {
        let mut class = simple_class();
        class.tasks.clear();
        assert_eq!(
            class.validate().unwrap_err(),
            ProfileError::NoTasks("Reader".to_string())
        );
    }

    #[test]
    fn test_zero_task_weight_rejected() {
        let mut class = simple_class();
        class.tasks[0].weight = 0;
        assert!(matches!(
            class.validate().unwrap_err(),
            ProfileError::ZeroTaskWeight { .. }
        ));
    }

    #[test]
    fn test_zero_class_weight_allowed_with_fixed_count() {
        let mut class = simple_class();
        class.weight = 0;
        assert!(class.validate().is_err());

        class.fixed_count = Some(2);
        assert!(class.validate().is_ok());
    }

    #[test]
    fn test_undefined_variable_rejected() {
        let mut class = simple_class();
        class.tasks.push(TaskDef::new(
            "detail",
            1,
            RequestSpec::get("/api/v2/boards/${board_id}/posts/1").unwrap(),
        ));

        let err = class.validate().unwrap_err();
        assert!(err.to_string().contains("board_id"), "error was: {}", err);

        class
            .variables
            .insert("board_id".to_string(), vec!["free".to_string()]);
        assert!(class.validate().is_ok());
    }

    #[test]
    fn test_empty_pool_rejected() {
        let mut class = simple_class();
        class.on_start = Some(StartupCheck {
            request: RequestSpec::get("/health/${node}").unwrap(),
            expected_status: 200,
        });
        class.variables.insert("node".to_string(), vec![]);

        assert!(matches!(
            class.validate().unwrap_err(),
            ProfileError::UndefinedVariable { .. }
        ));
    }

    #[test]
    fn test_duplicate_classes_rejected() {
        let classes = vec![simple_class(), simple_class()];
        assert_eq!(
            validate_classes(&classes).unwrap_err(),
            ProfileError::DuplicateClass("Reader".to_string())
        );
        assert_eq!(validate_classes(&[]).unwrap_err(), ProfileError::NoClasses);
    }

    #[test]
    fn test_task_selector() {
        let selector = simple_class().task_selector().unwrap();
        assert_eq!(selector.select().name, "menus");
    }
}
