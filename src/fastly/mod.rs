//! Fastly maintenance operations

mod acl;
mod client;
mod dictionary;

use anyhow::Result;

use crate::operation::{Arguments, Context, Handler, HandlerFuture, Param};
use crate::registry::Operation;

use client::{FastlyClient, Service};

const DICTIONARY: &[Param] = &[Param::ApiKey, Param::ServiceName, Param::DictionaryName];
const DICTIONARY_INPUT: &[Param] = &[
    Param::ApiKey,
    Param::ServiceName,
    Param::DictionaryName,
    Param::InputDictionary,
];
const DICTIONARY_KEYS: &[Param] = &[
    Param::ApiKey,
    Param::ServiceName,
    Param::DictionaryName,
    Param::DictionaryItems,
];
const ACL: &[Param] = &[Param::ApiKey, Param::ServiceName, Param::AclName];
const ACL_IPS: &[Param] = &[Param::ApiKey, Param::ServiceName, Param::AclName, Param::Ips];

type Run = for<'a> fn(&'a Context<'a>, Arguments) -> HandlerFuture<'a>;

/// A handler backed by a plain function and a fixed parameter list
struct Action {
    params: &'static [Param],
    run: Run,
}

impl Handler for Action {
    fn params(&self) -> &'static [Param] {
        self.params
    }

    fn call<'a>(&'a self, ctx: &'a Context<'a>, args: Arguments) -> HandlerFuture<'a> {
        (self.run)(ctx, args)
    }
}

/// Adapt an `async fn(&Context, Arguments) -> Result<bool>` to [`Run`]
macro_rules! boxed {
    ($f:path) => {{
        fn run<'a>(ctx: &'a Context<'a>, args: Arguments) -> HandlerFuture<'a> {
            Box::pin($f(ctx, args))
        }
        run as Run
    }};
}

fn op(name: &'static str, params: &'static [Param], run: Run) -> Operation {
    Operation {
        name,
        handler: Box::new(Action { params, run }),
    }
}

pub fn operations() -> Vec<Operation> {
    vec![
        op("add_entries_to_dictionary", DICTIONARY_INPUT, boxed!(dictionary::add_entries)),
        op("remove_entries_from_dictionary", DICTIONARY_KEYS, boxed!(dictionary::remove_entries)),
        op("add_entries_to_acl", ACL_IPS, boxed!(acl::add_entries)),
        op("remove_all_acl_entries", ACL, boxed!(acl::remove_all)),
        op("remove_acl_entries", ACL_IPS, boxed!(acl::remove_entries)),
        op("backup_fastly_dictionary", DICTIONARY, boxed!(dictionary::backup)),
        op("backup_acl", ACL, boxed!(acl::backup)),
        op("remove_old_fastly_dictionary_entries", DICTIONARY, boxed!(dictionary::remove_stale)),
        op("remove_all_dictionary_entries", DICTIONARY, boxed!(dictionary::remove_all)),
    ]
}

/// Client for the supplied credential plus the named service
async fn connect(ctx: &Context<'_>, args: &Arguments) -> Result<(FastlyClient, Service)> {
    let client = FastlyClient::new(&ctx.settings.api_base, args.text(Param::ApiKey)?)?;
    let service = client.service(args.text(Param::ServiceName)?).await?;
    Ok((client, service))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_operation_takes_credentials() {
        for op in operations() {
            let params = op.handler.params();
            assert!(params.contains(&Param::ApiKey), "{}", op.name);
            assert!(params.contains(&Param::ServiceName), "{}", op.name);
        }
    }

    #[test]
    fn dictionary_and_acl_parameters_do_not_mix() {
        for op in operations() {
            let params = op.handler.params();
            let dictionary = params.contains(&Param::DictionaryName);
            let acl = params.contains(&Param::AclName);
            assert!(dictionary != acl, "{}", op.name);
            if acl {
                assert!(!params.contains(&Param::InputDictionary));
                assert!(!params.contains(&Param::DictionaryItems));
            }
        }
    }

    #[test]
    fn removing_everything_needs_no_item_list() {
        let ops = operations();
        let op = ops
            .iter()
            .find(|op| op.name == "remove_all_dictionary_entries")
            .unwrap();
        assert!(!op.handler.params().contains(&Param::DictionaryItems));
    }
}
