//! Access control list operations

use anyhow::{anyhow, Context as _, Result};
use std::net::IpAddr;

use super::client::{AclEntry, EntryOp};
use super::connect;
use crate::logger::{date_filename, purge_files};
use crate::operation::{Arguments, Context, Param};

pub async fn add_entries(ctx: &Context<'_>, args: Arguments) -> Result<bool> {
    let name = args.text(Param::AclName)?;
    let targets = parse_ips(args.list(Param::Ips)?)?;
    let (client, service) = connect(ctx, &args).await?;
    let acl = client.acl_id(&service, name).await?;

    ctx.log
        .write_line(&format!("Adding {} entries to ACL: \"{}\"", targets.len(), name))?;
    let ops = targets
        .into_iter()
        .map(|(ip, subnet)| EntryOp::Create {
            ip: ip.to_string(),
            subnet,
        })
        .collect();
    client.update_acl(&service.id, &acl, ops).await
}

pub async fn remove_entries(ctx: &Context<'_>, args: Arguments) -> Result<bool> {
    let name = args.text(Param::AclName)?;
    let targets = parse_ips(args.list(Param::Ips)?)?;
    let (client, service) = connect(ctx, &args).await?;
    let acl = client.acl_id(&service, name).await?;
    let entries = client.acl_entries(&service.id, &acl).await?;

    let matched: Vec<_> = entries
        .iter()
        .filter(|entry| targets.iter().any(|target| matches(entry, target)))
        .collect();

    ctx.log.write_line(&format!(
        "Removing {} entries matching {} address(es) from ACL: \"{}\"",
        matched.len(),
        targets.len(),
        name
    ))?;
    client
        .update_acl(&service.id, &acl, delete_entries(matched.iter().map(|e| &e.id)))
        .await
}

pub async fn remove_all(ctx: &Context<'_>, args: Arguments) -> Result<bool> {
    let name = args.text(Param::AclName)?;
    let (client, service) = connect(ctx, &args).await?;
    let acl = client.acl_id(&service, name).await?;
    let entries = client.acl_entries(&service.id, &acl).await?;

    ctx.log
        .write_line(&format!("Removing all {} entries from ACL: \"{}\"", entries.len(), name))?;
    client
        .update_acl(&service.id, &acl, delete_entries(entries.iter().map(|e| &e.id)))
        .await
}

pub async fn backup(ctx: &Context<'_>, args: Arguments) -> Result<bool> {
    let name = args.text(Param::AclName)?;
    let (client, service) = connect(ctx, &args).await?;
    let acl = client.acl_id(&service, name).await?;
    let entries = client.acl_entries(&service.id, &acl).await?;

    if ctx.settings.prune_backups {
        purge_files("csv", &ctx.settings.backup_dir).context("Failed to remove old backups")?;
    }

    let file = ctx
        .settings
        .backup_dir
        .join(format!("{}_{}.csv", name, date_filename()));
    ctx.log.create_output_file(&file)?;
    ctx.log.append_row(&file, ["ip", "subnet", "negated", "comment"])?;
    for entry in &entries {
        ctx.log.append_row(
            &file,
            [
                entry.ip.as_str(),
                entry.subnet.as_deref().unwrap_or(""),
                entry.negated.as_deref().unwrap_or("0"),
                entry.comment.as_deref().unwrap_or(""),
            ],
        )?;
    }
    ctx.log
        .write_line(&format!("Backed up {} entries from ACL: \"{}\"", entries.len(), name))?;
    Ok(true)
}

fn delete_entries<'a>(ids: impl Iterator<Item = &'a String>) -> Vec<EntryOp> {
    ids.map(|id| EntryOp::Delete { id: id.clone() }).collect()
}

fn matches(entry: &AclEntry, (ip, subnet): &(IpAddr, Option<u8>)) -> bool {
    let Ok(entry_ip) = entry.ip.parse::<IpAddr>() else {
        return false;
    };
    let entry_subnet = entry.subnet.as_deref().and_then(|s| s.parse::<u8>().ok());
    entry_ip == *ip && host_bits(entry_ip, entry_subnet) == host_bits(*ip, *subnet)
}

/// A full-length prefix names the same single host as no prefix at all
fn host_bits(ip: IpAddr, subnet: Option<u8>) -> Option<u8> {
    let full = if ip.is_ipv4() { 32 } else { 128 };
    subnet.filter(|bits| *bits != full)
}

fn parse_ips(raw: &[String]) -> Result<Vec<(IpAddr, Option<u8>)>> {
    raw.iter().map(|s| parse_ip(s)).collect()
}

/// `addr` or `addr/bits`; a trailing comma from a pasted list is ignored
fn parse_ip(raw: &str) -> Result<(IpAddr, Option<u8>)> {
    let trimmed = raw.trim().trim_end_matches(',');
    let (ip, bits) = match trimmed.split_once('/') {
        Some((ip, bits)) => (ip, Some(bits)),
        None => (trimmed, None),
    };

    let addr: IpAddr = ip
        .parse()
        .with_context(|| format!("Invalid IP address: {:?}", raw))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };

    let subnet = bits
        .map(|bits| {
            bits.parse::<u8>()
                .ok()
                .filter(|b| *b <= max)
                .ok_or_else(|| anyhow!("Invalid subnet in {:?}: expected 0-{}", raw, max))
        })
        .transpose()?;

    Ok((addr, subnet))
}
