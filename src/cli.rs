//! CLI definition using clap

use clap::Parser;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::operation::InvocationRequest;

#[derive(Parser, Debug)]
#[command(name = "fastly-tools")]
#[command(version)]
#[command(about = "Fastly Power Tools - edge dictionary and ACL maintenance")]
#[command(after_help = r#"
Available operations:
  * add_entries_to_dictionary            --dictionary_name --input_dictionary
  * remove_entries_from_dictionary       --dictionary_name --dictionary_items
  * add_entries_to_acl                   --acl_name --ips
  * remove_all_acl_entries               --acl_name
  * remove_acl_entries                   --acl_name --ips
  * backup_fastly_dictionary             --dictionary_name
  * backup_acl                           --acl_name
  * remove_old_fastly_dictionary_entries --dictionary_name
  * remove_all_dictionary_entries        --dictionary_name

Examples:
  fastly-tools --operation add_entries_to_dictionary --api_key $KEY \
    --service_name www --dictionary_name redirects --input_dictionary '/a:/b,/c:/d'

  fastly-tools --operation remove_acl_entries --api_key $KEY \
    --service_name www --acl_name blocklist --ips 10.0.0.0/8 192.168.1.1
"#)]
pub struct Cli {
    /// Operation to run (see list below)
    #[arg(long, required_unless_present = "manifest")]
    pub operation: Option<String>,

    /// Fastly API key
    #[arg(long = "api_key", env = "FASTLY_API_KEY", hide_env_values = true, required_unless_present = "manifest")]
    pub api_key: Option<String>,

    /// The name of the Fastly service
    #[arg(long = "service_name", required_unless_present = "manifest")]
    pub service_name: Option<String>,

    /// Name of the Fastly dictionary
    #[arg(long = "dictionary_name")]
    pub dictionary_name: Option<String>,

    /// Name of the Fastly access control list
    #[arg(long = "acl_name")]
    pub acl_name: Option<String>,

    /// Comma separated key:value pairs: 'key1:value1,key2:value2'
    #[arg(long = "input_dictionary", value_parser = parse_key_value_pairs)]
    pub input_dictionary: Option<BTreeMap<String, String>>,

    /// Dictionary keys separated by spaces: --dictionary_items 1234 2345 3456
    #[arg(long = "dictionary_items", num_args = 1..)]
    pub dictionary_items: Option<Vec<String>>,

    /// IPs/CIDRs separated by spaces: --ips 192.168.50.0/24 192.168.1.1
    #[arg(long, num_args = 1..)]
    pub ips: Option<Vec<String>>,

    /// Machine output mode (JSON Lines)
    #[arg(long)]
    pub agent: bool,

    /// Print tool metadata
    #[arg(long)]
    pub manifest: bool,

    /// Show debug diagnostics on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn request(&self) -> InvocationRequest {
        InvocationRequest {
            api_key: self.api_key.clone(),
            service_name: self.service_name.clone(),
            dictionary_name: self.dictionary_name.clone(),
            acl_name: self.acl_name.clone(),
            input_dictionary: self.input_dictionary.clone(),
            dictionary_items: self.dictionary_items.clone(),
            ips: self.ips.clone(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid key:value pair format: {0}")]
pub struct PairFormatError(pub String);

/// Parse `key:value,key:value`; every pair must split on exactly one colon
pub fn parse_key_value_pairs(pairs: &str) -> Result<BTreeMap<String, String>, PairFormatError> {
    pairs
        .split(',')
        .map(|pair| {
            let mut parts = pair.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => Ok((key.to_string(), value.to_string())),
                _ => Err(PairFormatError(pairs.to_string())),
            }
        })
        .collect()
}
