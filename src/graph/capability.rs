//! Capability resolution: second-pass dependency injection from
//! `provides`/`needs` declarations.
//!
//! Runs after matrix expansion. Every `provides` name is registered to
//! exactly one provider task; every `needs` entry must find its provider
//! in the registry. Each need adds the provider to the needer's
//! `depends_on` (deduplicated, preserving existing order) and, when the
//! provider declared a value, injects `SYKLI_CAP_<NAME>` into the
//! needer's environment.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::SykliError;
use crate::graph::Task;

/// Capability names are lowercase so the derived env variable names stay
/// predictable.
static CAPABILITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("static capability pattern"));

/// Env variable name for a capability value: uppercased, hyphens to
/// underscores, prefixed `SYKLI_CAP_`.
pub fn env_var_name(capability: &str) -> String {
    format!(
        "SYKLI_CAP_{}",
        capability.to_uppercase().replace('-', "_")
    )
}

/// Resolves capabilities across the expanded graph, mutating `tasks` in
/// place. Running it twice yields the same graph.
pub fn resolve(tasks: &mut [Task]) -> Result<(), SykliError> {
    // Registry: capability name -> (provider task name, optional value).
    let mut registry: BTreeMap<String, (String, Option<String>)> = BTreeMap::new();

    for task in tasks.iter() {
        if !task.provides.is_empty() && !task.matrix.is_empty() {
            return Err(SykliError::CapabilityMatrix {
                task: task.name.clone(),
            });
        }
        for provide in &task.provides {
            if !CAPABILITY_RE.is_match(&provide.name) {
                return Err(SykliError::CapabilityInvalidName {
                    name: provide.name.clone(),
                    task: task.name.clone(),
                });
            }
            if task.needs.contains(&provide.name) {
                return Err(SykliError::CapabilitySelf {
                    name: provide.name.clone(),
                    task: task.name.clone(),
                });
            }
            if let Some((first, _)) = registry.get(&provide.name) {
                return Err(SykliError::CapabilityDuplicate {
                    name: provide.name.clone(),
                    first: first.clone(),
                    second: task.name.clone(),
                });
            }
            registry.insert(
                provide.name.clone(),
                (task.name.clone(), provide.value.clone()),
            );
        }
    }

    for task in tasks.iter_mut() {
        for need in &task.needs {
            if !CAPABILITY_RE.is_match(need) {
                return Err(SykliError::CapabilityInvalidName {
                    name: need.clone(),
                    task: task.name.clone(),
                });
            }
            let Some((provider, value)) = registry.get(need) else {
                return Err(SykliError::CapabilityMissing {
                    name: need.clone(),
                    task: task.name.clone(),
                });
            };
            if !task.depends_on.contains(provider) {
                task.depends_on.push(provider.clone());
            }
            if let Some(value) = value {
                task.env.insert(env_var_name(need), value.clone());
            }
        }
        if !task.needs.is_empty() {
            debug!(task = %task.name, needs = task.needs.len(), "resolved capabilities");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Provide;

    fn provider(name: &str, cap: &str, value: Option<&str>) -> Task {
        let mut t = Task::new(name, "true");
        t.provides = vec![Provide {
            name: cap.to_string(),
            value: value.map(|v| v.to_string()),
        }];
        t
    }

    fn needer(name: &str, caps: &[&str]) -> Task {
        let mut t = Task::new(name, "true");
        t.needs = caps.iter().map(|c| c.to_string()).collect();
        t
    }

    #[test]
    fn test_need_adds_dependency() {
        let mut tasks = vec![provider("db", "db-ready", None), needer("api", &["db-ready"])];
        resolve(&mut tasks).unwrap();
        assert_eq!(tasks[1].depends_on, vec!["db"]);
    }

    #[test]
    fn test_value_injected_as_env() {
        let mut tasks = vec![
            provider("api", "api-url", Some("http://localhost:8080")),
            needer("smoke", &["api-url"]),
        ];
        resolve(&mut tasks).unwrap();
        assert_eq!(
            tasks[1].env.get("SYKLI_CAP_API_URL").unwrap(),
            "http://localhost:8080"
        );
    }

    #[test]
    fn test_env_var_name_uppercases_and_underscores() {
        assert_eq!(env_var_name("db-ready"), "SYKLI_CAP_DB_READY");
        assert_eq!(env_var_name("api_url"), "SYKLI_CAP_API_URL");
    }

    #[test]
    fn test_existing_dependency_not_duplicated() {
        let mut n = needer("api", &["db-ready"]);
        n.depends_on = vec!["db".to_string()];
        let mut tasks = vec![provider("db", "db-ready", None), n];
        resolve(&mut tasks).unwrap();
        assert_eq!(tasks[1].depends_on, vec!["db"]);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut tasks = vec![
            provider("db", "db-ready", Some("ready")),
            needer("api", &["db-ready"]),
        ];
        resolve(&mut tasks).unwrap();
        let after_once = tasks.clone();
        resolve(&mut tasks).unwrap();
        assert_eq!(tasks, after_once);
    }

    #[test]
    fn test_missing_capability() {
        let mut tasks = vec![needer("api", &["ghost"])];
        let err = resolve(&mut tasks).unwrap_err();
        assert!(matches!(
            err,
            SykliError::CapabilityMissing { name, task } if name == "ghost" && task == "api"
        ));
    }

    #[test]
    fn test_duplicate_providers() {
        let mut tasks = vec![
            provider("a", "db-ready", None),
            provider("b", "db-ready", None),
        ];
        let err = resolve(&mut tasks).unwrap_err();
        assert!(matches!(
            err,
            SykliError::CapabilityDuplicate { first, second, .. } if first == "a" && second == "b"
        ));
    }

    #[test]
    fn test_self_capability() {
        let mut t = provider("a", "db-ready", None);
        t.needs = vec!["db-ready".to_string()];
        let mut tasks = vec![t];
        let err = resolve(&mut tasks).unwrap_err();
        assert!(matches!(err, SykliError::CapabilitySelf { .. }));
    }

    #[test]
    fn test_matrix_with_provides_rejected() {
        let mut t = provider("a", "db-ready", None);
        t.matrix = vec![("ver".to_string(), vec!["1".to_string()])];
        let mut tasks = vec![t];
        let err = resolve(&mut tasks).unwrap_err();
        assert!(matches!(err, SykliError::CapabilityMatrix { task } if task == "a"));
    }

    #[test]
    fn test_invalid_capability_name() {
        let mut tasks = vec![provider("a", "Not-Valid", None)];
        let err = resolve(&mut tasks).unwrap_err();
        assert!(matches!(err, SykliError::CapabilityInvalidName { .. }));
    }
}
