//! Operation dispatch: resolve the handler, bind only the arguments it
//! declares, run it and classify the outcome.

use std::io;

use thiserror::Error;
use tracing::{debug, info};

use crate::operation::{Arguments, Context, InvocationRequest, Param};
use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Operation '{0}' does not exist or is unavailable.")]
    UnknownOperation(String),

    #[error("Operation, {0}, has failed.")]
    Failed(String),

    #[error("Operation, {name}, raised an error: {detail}")]
    Handler {
        name: String,
        detail: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write script log: {0}")]
    Log(#[from] io::Error),
}

/// Arguments for a handler declaring `declared`: each declared parameter
/// the request has a value for, and nothing else.
pub fn bind(declared: &[Param], request: &InvocationRequest) -> Arguments {
    let mut args = Arguments::default();
    for &param in declared {
        if let Some(value) = request.value(param) {
            args.insert(param, value);
        }
    }
    args
}

pub async fn dispatch(
    registry: &Registry,
    ctx: &Context<'_>,
    name: &str,
    request: &InvocationRequest,
) -> Result<(), DispatchError> {
    let Some(handler) = registry.lookup(name) else {
        debug!(available = ?registry.names().collect::<Vec<_>>(), "unknown operation {:?}", name);
        let err = DispatchError::UnknownOperation(name.to_string());
        ctx.log.record_error(&err.to_string(), line!())?;
        return Err(err);
    };

    let args = bind(handler.params(), request);
    debug!(
        operation = name,
        bound = ?args.params().map(Param::name).collect::<Vec<_>>(),
        "invoking handler"
    );

    match handler.call(ctx, args).await {
        Ok(true) => {
            info!(operation = name, "operation succeeded");
            Ok(())
        }
        Ok(false) => {
            let err = DispatchError::Failed(name.to_string());
            ctx.log.record_error(&err.to_string(), line!())?;
            Err(err)
        }
        Err(source) => Err(DispatchError::Handler {
            name: name.to_string(),
            detail: format!("{:#}", source),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::logger::Logger;
    use crate::operation::{Handler, HandlerFuture, Value};
    use crate::registry::Operation;
    use anyhow::anyhow;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Clone, Copy)]
    enum Outcome {
        Succeed,
        Fail,
        Raise,
    }

    /// Records every argument set it is invoked with
    struct Probe {
        params: &'static [Param],
        outcome: Outcome,
        seen: Rc<RefCell<Vec<Arguments>>>,
    }

    impl Handler for Probe {
        fn params(&self) -> &'static [Param] {
            self.params
        }

        fn call<'a>(&'a self, _ctx: &'a Context<'a>, args: Arguments) -> HandlerFuture<'a> {
            self.seen.borrow_mut().push(args);
            let outcome = self.outcome;
            Box::pin(async move {
                match outcome {
                    Outcome::Succeed => Ok(true),
                    Outcome::Fail => Ok(false),
                    Outcome::Raise => Err(anyhow!("provider exploded")),
                }
            })
        }
    }

    struct Harness {
        dir: TempDir,
        log: Logger,
        settings: Settings,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let settings = Settings::from_lookup(dir.path().to_path_buf(), |_| None).unwrap();
            let log = Logger::open(&settings.log_file).unwrap().with_echo(false);
            Self { dir, log, settings }
        }

        fn ctx(&self) -> Context<'_> {
            Context {
                log: &self.log,
                settings: &self.settings,
            }
        }

        fn log_text(&self) -> String {
            fs::read_to_string(self.dir.path().join("log.txt")).unwrap()
        }
    }

    fn probe(
        name: &'static str,
        params: &'static [Param],
        outcome: Outcome,
    ) -> (Registry, Rc<RefCell<Vec<Arguments>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let handler = Probe {
            params,
            outcome,
            seen: Rc::clone(&seen),
        };
        let registry = Registry::new(vec![Operation {
            name,
            handler: Box::new(handler),
        }]);
        (registry, seen)
    }

    fn full_request() -> InvocationRequest {
        InvocationRequest {
            api_key: Some("key".into()),
            service_name: Some("www".into()),
            dictionary_name: Some("redirects".into()),
            acl_name: Some("blocklist".into()),
            input_dictionary: Some(BTreeMap::from([("a".into(), "1".into())])),
            dictionary_items: Some(vec!["a".into()]),
            ips: Some(vec!["10.0.0.0/8".into()]),
        }
    }

    fn credentials_only() -> InvocationRequest {
        InvocationRequest {
            api_key: Some("key".into()),
            service_name: Some("www".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn passes_only_declared_parameters() {
        let h = Harness::new();
        let (registry, seen) = probe(
            "backup_fastly_dictionary",
            &[Param::ApiKey, Param::ServiceName, Param::DictionaryName],
            Outcome::Succeed,
        );

        dispatch(&registry, &h.ctx(), "backup_fastly_dictionary", &full_request())
            .await
            .unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].params().collect::<Vec<_>>(),
            [Param::ApiKey, Param::ServiceName, Param::DictionaryName]
        );
        assert_eq!(
            seen[0].get(Param::DictionaryName),
            Some(&Value::Text("redirects".into()))
        );
    }

    #[tokio::test]
    async fn omits_declared_parameters_that_were_not_supplied() {
        let h = Harness::new();
        let (registry, seen) = probe(
            "remove_entries_from_dictionary",
            &[
                Param::ApiKey,
                Param::ServiceName,
                Param::DictionaryName,
                Param::DictionaryItems,
            ],
            Outcome::Succeed,
        );

        dispatch(&registry, &h.ctx(), "remove_entries_from_dictionary", &credentials_only())
            .await
            .unwrap();

        let seen = seen.borrow();
        assert_eq!(seen[0].params().count(), 2);
        assert!(seen[0].get(Param::DictionaryName).is_none());
        assert!(seen[0].get(Param::DictionaryItems).is_none());
    }

    #[tokio::test]
    async fn credentials_alone_are_enough_for_a_handler_that_needs_nothing_else() {
        let h = Harness::new();
        let (registry, seen) = probe(
            "remove_all_dictionary_entries",
            &[Param::ApiKey, Param::ServiceName],
            Outcome::Succeed,
        );

        let result = dispatch(
            &registry,
            &h.ctx(),
            "remove_all_dictionary_entries",
            &credentials_only(),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(h.log_text(), "");
    }

    #[tokio::test]
    async fn unknown_operation_logs_one_error() {
        let h = Harness::new();
        let (registry, seen) = probe("backup_acl", &[Param::ApiKey], Outcome::Succeed);

        let err = dispatch(&registry, &h.ctx(), "delete_everything", &full_request())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::UnknownOperation(ref n) if n == "delete_everything"));
        assert!(seen.borrow().is_empty());

        let log = h.log_text();
        let entries: Vec<_> = log.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("Error [File: dispatch.rs Line: "));
        assert_attribution_agrees(entries[0]);
        assert!(entries[0].contains("Operation 'delete_everything' does not exist or is unavailable."));
    }

    #[tokio::test]
    async fn negative_result_is_logged_and_raised() {
        let h = Harness::new();
        let (registry, _) = probe("backup_acl", &[Param::ApiKey], Outcome::Fail);

        let err = dispatch(&registry, &h.ctx(), "backup_acl", &full_request())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Failed(_)));
        assert_eq!(err.to_string(), "Operation, backup_acl, has failed.");
        let log = h.log_text();
        let entry = log.lines().find(|l| l.contains("has failed")).unwrap();
        assert!(entry.contains("- Operation, backup_acl, has failed."));
        assert_attribution_agrees(entry);
    }

    /// The `file: line` prefix and the `[File: .. Line: ..]` tag name the same spot
    fn assert_attribution_agrees(entry: &str) {
        let prefix_line = entry
            .split(", dispatch.rs: ")
            .nth(1)
            .and_then(|rest| rest.split(']').next())
            .unwrap();
        assert!(
            entry.contains(&format!("[File: dispatch.rs Line: {}]", prefix_line)),
            "{:?}",
            entry
        );
    }

    #[tokio::test]
    async fn handler_errors_propagate_wrapped() {
        let h = Harness::new();
        let (registry, _) = probe("backup_acl", &[Param::ApiKey], Outcome::Raise);

        let err = dispatch(&registry, &h.ctx(), "backup_acl", &full_request())
            .await
            .unwrap_err();

        match err {
            DispatchError::Handler { name, source, .. } => {
                assert_eq!(name, "backup_acl");
                assert_eq!(source.to_string(), "provider exploded");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(h.log_text(), "");
    }

    fn subset(mask: u32) -> Vec<Param> {
        Param::ALL
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, p)| *p)
            .collect()
    }

    fn request_with(present: &[Param]) -> InvocationRequest {
        let full = full_request();
        let pick = |p: Param| present.contains(&p);
        InvocationRequest {
            api_key: full.api_key.filter(|_| pick(Param::ApiKey)),
            service_name: full.service_name.filter(|_| pick(Param::ServiceName)),
            dictionary_name: full.dictionary_name.filter(|_| pick(Param::DictionaryName)),
            acl_name: full.acl_name.filter(|_| pick(Param::AclName)),
            input_dictionary: full.input_dictionary.filter(|_| pick(Param::InputDictionary)),
            dictionary_items: full.dictionary_items.filter(|_| pick(Param::DictionaryItems)),
            ips: full.ips.filter(|_| pick(Param::Ips)),
        }
    }

    #[test]
    fn bound_set_is_declared_intersect_present() {
        let all = 1u32 << Param::ALL.len();
        for declared_mask in 0..all {
            let declared = subset(declared_mask);
            for present_mask in 0..all {
                let present = subset(present_mask);
                let args = bind(&declared, &request_with(&present));

                let expected: Vec<Param> = declared
                    .iter()
                    .copied()
                    .filter(|p| present.contains(p))
                    .collect();
                assert_eq!(args.params().collect::<Vec<_>>(), expected);
            }
        }
    }
}
