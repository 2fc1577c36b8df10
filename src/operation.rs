//! Handler contract: the named parameters an operation can declare, the
//! values the CLI supplies for them, and the trait every handler implements.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::config::Settings;
use crate::logger::Logger;

/// Every named value a handler may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Param {
    ApiKey,
    ServiceName,
    DictionaryName,
    AclName,
    InputDictionary,
    DictionaryItems,
    Ips,
}

impl Param {
    pub const ALL: [Param; 7] = [
        Param::ApiKey,
        Param::ServiceName,
        Param::DictionaryName,
        Param::AclName,
        Param::InputDictionary,
        Param::DictionaryItems,
        Param::Ips,
    ];

    /// Name as it appears on the command line
    pub fn name(self) -> &'static str {
        match self {
            Param::ApiKey => "api_key",
            Param::ServiceName => "service_name",
            Param::DictionaryName => "dictionary_name",
            Param::AclName => "acl_name",
            Param::InputDictionary => "input_dictionary",
            Param::DictionaryItems => "dictionary_items",
            Param::Ips => "ips",
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Pairs(BTreeMap<String, String>),
    List(Vec<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Pairs(_) => "key:value pairs",
            Value::List(_) => "list",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("missing required argument --{0}")]
    Missing(Param),

    #[error("argument --{param} should be {expected}, got {actual}")]
    WrongKind {
        param: Param,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Everything the operator supplied, present or not
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationRequest {
    pub api_key: Option<String>,
    pub service_name: Option<String>,
    pub dictionary_name: Option<String>,
    pub acl_name: Option<String>,
    pub input_dictionary: Option<BTreeMap<String, String>>,
    pub dictionary_items: Option<Vec<String>>,
    pub ips: Option<Vec<String>>,
}

impl InvocationRequest {
    /// Supplied value for `param`, `None` when absent
    pub fn value(&self, param: Param) -> Option<Value> {
        match param {
            Param::ApiKey => self.api_key.clone().map(Value::Text),
            Param::ServiceName => self.service_name.clone().map(Value::Text),
            Param::DictionaryName => self.dictionary_name.clone().map(Value::Text),
            Param::AclName => self.acl_name.clone().map(Value::Text),
            Param::InputDictionary => self.input_dictionary.clone().map(Value::Pairs),
            Param::DictionaryItems => self.dictionary_items.clone().map(Value::List),
            Param::Ips => self.ips.clone().map(Value::List),
        }
    }
}

/// The arguments a handler is actually invoked with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments(BTreeMap<Param, Value>);

impl Arguments {
    pub fn insert(&mut self, param: Param, value: Value) {
        self.0.insert(param, value);
    }

    pub fn get(&self, param: Param) -> Option<&Value> {
        self.0.get(&param)
    }

    pub fn params(&self) -> impl Iterator<Item = Param> + '_ {
        self.0.keys().copied()
    }

    pub fn text(&self, param: Param) -> Result<&str, ArgumentError> {
        match self.require(param)? {
            Value::Text(s) => Ok(s),
            other => Err(wrong_kind(param, "text", other)),
        }
    }

    pub fn pairs(&self, param: Param) -> Result<&BTreeMap<String, String>, ArgumentError> {
        match self.require(param)? {
            Value::Pairs(map) => Ok(map),
            other => Err(wrong_kind(param, "key:value pairs", other)),
        }
    }

    pub fn list(&self, param: Param) -> Result<&[String], ArgumentError> {
        match self.require(param)? {
            Value::List(items) => Ok(items),
            other => Err(wrong_kind(param, "list", other)),
        }
    }

    fn require(&self, param: Param) -> Result<&Value, ArgumentError> {
        self.get(param).ok_or(ArgumentError::Missing(param))
    }
}

fn wrong_kind(param: Param, expected: &'static str, actual: &Value) -> ArgumentError {
    ArgumentError::WrongKind {
        param,
        expected,
        actual: actual.kind(),
    }
}

/// Shared state handed to every handler invocation
pub struct Context<'a> {
    pub log: &'a Logger,
    pub settings: &'a Settings,
}

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<bool>> + 'a>>;

/// An operation implementation.
///
/// `params` is the complete set of named values the handler accepts; the
/// dispatcher never passes anything outside it. `call` resolves to
/// `Ok(false)` when the work ran but did not succeed.
pub trait Handler {
    fn params(&self) -> &'static [Param];

    fn call<'a>(&'a self, ctx: &'a Context<'a>, args: Arguments) -> HandlerFuture<'a>;
}
