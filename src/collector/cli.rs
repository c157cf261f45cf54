// P4SENTRY: Anomaly Detection on P4/BMv2 Match-Action Tables
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Control-plane access through the BMv2 runtime CLI (`simple_switch_CLI`), which talks Thrift to
//! the switch. Commands are written to the CLI's stdin, and the textual dump is parsed.
use std::{net::Ipv4Addr, process::Stdio};

use async_trait::async_trait;
use ipnet::Ipv4Net;
use lazy_static::lazy_static;
use mac_address::MacAddress;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::{io::AsyncWriteExt, process::Command};

use super::{bmv2_json::ProgramInfo, CollectError, ControlPlane};
use crate::entries::{CounterEntry, TableEntry};

lazy_static! {
    static ref MATCH_KEY: Regex =
        Regex::new(r"^\*\s*(?P<field>\S+)\s*:\s*(?P<kind>[A-Z]+)\s+(?P<value>.*?)\s*$").unwrap();
    static ref COUNTER_VALUE: Regex = Regex::new(
        r"\[(?P<index>[0-9]+)\]\s*=\s*BmCounterValue\(packets=(?P<packets>[0-9]+),\s*bytes=(?P<bytes>[0-9]+)\)"
    )
    .unwrap();
}

const PROMPT: &str = "RuntimeCmd:";

/// Client for the runtime CLI of a single BMv2 switch.
#[derive(Debug, Clone)]
pub struct SwitchCli {
    cli: String,
    thrift_port: u16,
    program: Option<ProgramInfo>,
}

impl SwitchCli {
    pub fn new(cli: impl Into<String>, thrift_port: u16, program: Option<ProgramInfo>) -> Self {
        Self {
            cli: cli.into(),
            thrift_port,
            program,
        }
    }

    /// Run the CLI once, feeding `commands` on stdin, and return its stdout.
    async fn run(&self, commands: &str) -> Result<String, CollectError> {
        log::trace!("{} --thrift-port {} <<< {commands:?}", self.cli, self.thrift_port);
        let mut child = Command::new(&self.cli)
            .args(["--thrift-port", &self.thrift_port.to_string()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(commands.as_bytes()).await?;
            // closing stdin terminates the CLI after the last command
        }
        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            return Err(CollectError::Cli {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        if let Some(line) = stdout.lines().find(|l| l.contains("Error:")) {
            return Err(CollectError::Command(strip_prompt(line).to_string()));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl ControlPlane for SwitchCli {
    async fn table_entries(&mut self, table: &str) -> Result<Vec<TableEntry>, CollectError> {
        let stdout = self.run(&format!("table_dump {table}\n")).await?;
        if self.program.is_none() {
            log::warn!(
                "No BMv2 JSON given. Action parameters of {table} are named by convention \
                 (`dst_mac` for MAC addresses, `port` for a single remaining parameter)."
            );
        }
        Ok(parse_table_dump(&stdout, self.program.as_ref()))
    }

    async fn counter_values(
        &mut self,
        counter: &str,
        size: Option<usize>,
    ) -> Result<Vec<CounterEntry>, CollectError> {
        let size = size
            .or_else(|| self.program.as_ref().and_then(|p| p.counter_size(counter)))
            .ok_or_else(|| CollectError::UnknownCounterSize(counter.to_string()))?;
        let commands: String = (0..size)
            .map(|i| format!("counter_read {counter} {i}\n"))
            .collect();
        let stdout = self.run(&commands).await?;
        Ok(parse_counter_values(&stdout))
    }
}

fn strip_prompt(line: &str) -> &str {
    let mut line = line.trim();
    while let Some(rest) = line.strip_prefix(PROMPT) {
        line = rest.trim();
    }
    line
}

/// Parse the output of `table_dump <table>`. The default entry is not part of the table and is
/// skipped.
pub fn parse_table_dump(stdout: &str, program: Option<&ProgramInfo>) -> Vec<TableEntry> {
    let mut entries = Vec::new();
    let mut current: Option<TableEntry> = None;

    for line in stdout.lines().map(strip_prompt) {
        if line.starts_with("Dumping entry") {
            entries.extend(current.take());
            current = Some(TableEntry::default());
        } else if line.starts_with("Dumping default entry") {
            entries.extend(current.take());
        } else if let Some(entry) = current.as_mut() {
            if let Some(caps) = MATCH_KEY.captures(line) {
                decode_match_key(
                    &mut entry.match_fields,
                    &caps["field"],
                    &caps["kind"],
                    &caps["value"],
                );
            } else if let Some(action) = line.strip_prefix("Action entry:") {
                let action = action.trim();
                let (name, params) = action.split_once(" -").unwrap_or((action, ""));
                entry.action_name = name.trim().to_string();
                entry.action_params = decode_action_params(&entry.action_name, params, program);
            } else if let Some(priority) = line.strip_prefix("Priority:") {
                if let Ok(priority) = priority.trim().parse::<u64>() {
                    entry
                        .match_fields
                        .insert("priority".to_string(), Value::from(priority));
                }
            }
        }
    }
    entries.extend(current);

    log::debug!("parsed {} table entries", entries.len());
    entries
}

fn decode_match_key(fields: &mut Map<String, Value>, field: &str, kind: &str, value: &str) {
    let looks_like_ip = field.to_lowercase().contains("ip");
    match kind {
        "LPM" => {
            let (addr, len) = value.split_once('/').unwrap_or((value, ""));
            match (u32::from_str_radix(addr.trim(), 16), len.trim().parse::<u8>()) {
                (Ok(addr), Ok(len)) if looks_like_ip || addr_len(value) == 8 => {
                    match Ipv4Net::new(Ipv4Addr::from(addr), len) {
                        Ok(net) => {
                            fields.insert(field.to_string(), Value::from(net.addr().to_string()));
                            fields.insert(
                                format!("{field}_prefix_len"),
                                Value::from(net.prefix_len()),
                            );
                        }
                        Err(_) => {
                            fields.insert(field.to_string(), Value::from(value));
                        }
                    }
                }
                (_, Ok(len)) => {
                    fields.insert(field.to_string(), decode_hex(addr.trim(), None, looks_like_ip));
                    fields.insert(format!("{field}_prefix_len"), Value::from(len));
                }
                _ => {
                    fields.insert(field.to_string(), Value::from(value));
                }
            }
        }
        "TERNARY" => {
            let (v, mask) = value.split_once("&&&").unwrap_or((value, ""));
            fields.insert(field.to_string(), decode_hex(v.trim(), None, looks_like_ip));
            if !mask.trim().is_empty() {
                fields.insert(
                    format!("{field}_mask"),
                    decode_hex(mask.trim(), None, looks_like_ip),
                );
            }
        }
        "EXACT" => {
            fields.insert(field.to_string(), decode_hex(value, None, looks_like_ip));
        }
        _ => {
            fields.insert(field.to_string(), Value::from(value));
        }
    }
}

fn addr_len(value: &str) -> usize {
    value.split('/').next().map(|a| a.trim().len()).unwrap_or(0)
}

fn decode_action_params(
    action: &str,
    params: &str,
    program: Option<&ProgramInfo>,
) -> Map<String, Value> {
    let values: Vec<&str> = params
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let declared = program
        .and_then(|p| p.action_params(action))
        .filter(|declared| declared.len() == values.len());
    if program.is_some() && declared.is_none() && !values.is_empty() {
        log::warn!("Action `{action}` is not declared with {} parameters in the BMv2 JSON.", values.len());
    }

    match declared {
        Some(declared) => values
            .into_iter()
            .zip(declared)
            .map(|(raw, param)| {
                let looks_like_ip = param.name.to_lowercase().contains("ip");
                (param.name.clone(), decode_hex(raw, param.bitwidth, looks_like_ip))
            })
            .collect(),
        None => conventional_params(&values),
    }
}

/// Name undeclared action parameters: the first 48-bit value is `dst_mac`, and if exactly one
/// other parameter remains, it is the `port`. All others are `param_<i>`.
fn conventional_params(values: &[&str]) -> Map<String, Value> {
    let is_mac = |raw: &str| raw.trim_start_matches("0x").len() == 12;
    let mac = values.iter().position(|raw| is_mac(raw));
    let others: Vec<usize> = (0..values.len()).filter(|i| Some(*i) != mac).collect();
    values
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let name = if Some(i) == mac {
                "dst_mac".to_string()
            } else if others.len() == 1 {
                "port".to_string()
            } else {
                format!("param_{i}")
            };
            (name, decode_hex(raw, None, false))
        })
        .collect()
}

/// Decode a hex string printed by the runtime CLI. 48-bit values are rendered as MAC addresses,
/// 32-bit values of IP fields as dotted quads, and everything else as an integer. Values that do
/// not fit into 64 bits are kept as hex strings.
fn decode_hex(raw: &str, bitwidth: Option<usize>, looks_like_ip: bool) -> Value {
    let digits = raw.trim_start_matches("0x");
    let Ok(value) = u64::from_str_radix(digits, 16) else {
        return Value::from(raw);
    };
    let width = bitwidth.unwrap_or(digits.len() * 4);
    if width == 48 {
        let b = value.to_be_bytes();
        let mac = MacAddress::new([b[2], b[3], b[4], b[5], b[6], b[7]]);
        Value::from(mac.to_string().to_lowercase())
    } else if width == 32 && looks_like_ip {
        Value::from(Ipv4Addr::from(value as u32).to_string())
    } else {
        Value::from(value)
    }
}

/// Parse the output of one or more `counter_read <counter> <index>` commands.
pub fn parse_counter_values(stdout: &str) -> Vec<CounterEntry> {
    COUNTER_VALUE
        .captures_iter(stdout)
        .filter_map(|caps| {
            Some(CounterEntry {
                index: caps["index"].parse().ok()?,
                packets: caps["packets"].parse().ok()?,
                bytes: caps["bytes"].parse().ok()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    const DUMP: &str = "\
Obtaining JSON from switch...
Done
Control utility for runtime P4 table manipulation
RuntimeCmd: ==========
TABLE ENTRIES
**********
Dumping entry 0x0
Match key:
* hdr.ipv4.dstAddr        : LPM       0a000101/24
Action entry: MyIngress.ipv4_forward - 000000000001, 01
**********
Dumping entry 0x1
Match key:
* hdr.ipv4.dstAddr        : LPM       0a000201/24
Action entry: MyIngress.ipv4_forward - 000000000002, 02
==========
Dumping default entry
Action entry: MyIngress.drop -
==========
RuntimeCmd:
";

    const PROGRAM: &str = r#"{"actions": [{"name": "MyIngress.ipv4_forward", "runtime_data": [
        {"name": "dst_mac", "bitwidth": 48}, {"name": "port", "bitwidth": 9}
    ]}]}"#;

    #[test]
    fn parse_lpm_dump_with_program() {
        let program = ProgramInfo::parse(PROGRAM).unwrap();
        let entries = parse_table_dump(DUMP, Some(&program));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action_name, "MyIngress.ipv4_forward");
        assert_eq!(entries[0].match_fields["hdr.ipv4.dstAddr"], json!("10.0.1.1"));
        assert_eq!(entries[0].match_fields["hdr.ipv4.dstAddr_prefix_len"], json!(24));
        assert_eq!(entries[0].action_params["dst_mac"], json!("00:00:00:00:00:01"));
        assert_eq!(entries[0].action_params["port"], json!(1));
        assert_eq!(entries[1].action_params["port"], json!(2));
    }

    #[test]
    fn parse_exact_dump_without_program() {
        let dump = "\
RuntimeCmd: ==========
TABLE ENTRIES
**********
Dumping entry 0x0
Match key:
* hdr.ethernet.dstAddr    : EXACT     00000000000a
Action entry: set_egress_port - 03
==========
Dumping default entry
Action entry: NoAction -
==========
";
        let entries = parse_table_dump(dump, None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action_name, "set_egress_port");
        assert_eq!(
            entries[0].match_fields["hdr.ethernet.dstAddr"],
            json!("00:00:00:00:00:0a")
        );
        assert_eq!(entries[0].action_params["port"], json!(3));
    }

    #[test]
    fn parse_lpm_dump_without_program() {
        let entries = parse_table_dump(DUMP, None);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action_params["dst_mac"], json!("00:00:00:00:00:01"));
        assert_eq!(entries[0].action_params["port"], json!(1));
        assert_eq!(entries[1].action_params["port"], json!(2));
    }

    #[test]
    fn undeclared_params_without_port() {
        let params = decode_action_params("rewrite", "01, 02, 03", None);
        let names: Vec<&str> = params.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["param_0", "param_1", "param_2"]);
    }

    #[test]
    fn dumped_forwarding_table_keeps_egress_port() {
        let entries = parse_table_dump(DUMP, None);
        let table = crate::preprocessor::flatten_entries(
            &entries,
            crate::preprocessor::TableKind::Ipv4.flatten_schema(),
        )
        .unwrap();
        let ports: Vec<Option<&str>> = table.column("egress_port").unwrap().collect();
        assert_eq!(ports, vec![Some("1"), Some("2")]);
    }

    #[test]
    fn parse_ternary_with_priority() {
        let dump = "\
Dumping entry 0x0
Match key:
* hdr.ipv4.srcAddr        : TERNARY   0a000000 &&& ff000000
Priority: 10
Action entry: allow -
";
        let entries = parse_table_dump(dump, None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].match_fields["hdr.ipv4.srcAddr"], json!("10.0.0.0"));
        assert_eq!(entries[0].match_fields["hdr.ipv4.srcAddr_mask"], json!("255.0.0.0"));
        assert_eq!(entries[0].match_fields["priority"], json!(10));
        assert!(entries[0].action_params.is_empty());
    }

    #[test]
    fn parse_counters() {
        let stdout = "\
RuntimeCmd: packet_counter[0]=  BmCounterValue(packets=10, bytes=1000)
RuntimeCmd: packet_counter[1]=  BmCounterValue(packets=0, bytes=0)
RuntimeCmd: ";
        assert_eq!(
            parse_counter_values(stdout),
            vec![
                CounterEntry { index: 0, packets: 10, bytes: 1000 },
                CounterEntry { index: 1, packets: 0, bytes: 0 },
            ]
        );
    }
}
