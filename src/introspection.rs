//! Deep host introspection for Windows-like targets
//!
//! An [`IntrospectionCascade`] tries its strategies in priority order and
//! stops at the first one that returns any attributes. Strategies swallow
//! their own failures; the cascade always produces a (possibly empty)
//! attribute set.
//!
//! Strategies, highest confidence first:
//! 1. `wmi` - remote WMI class queries
//! 2. `smb` - administrative share access check
//! 3. `powershell` - remote script over PowerShell remoting
//! 4. `local-commands` - `net view` / `systeminfo`, only from a Windows host
//! 5. `port-signature` - open RDP/SMB/NetBIOS ports

use async_trait::async_trait;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::process::Command;
use tracing::{debug, info};

use crate::{
    config::{AppConfig, IntrospectionConfig, ServicePort},
    core::{Attributes, AssetType, UNKNOWN},
    error::{ErrorContext, Result, ScannerError},
    metrics,
    network::NetworkProbe,
};

#[async_trait]
pub trait IntrospectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// An empty map means "nothing learned"; the cascade moves on
    async fn probe(&self, address: &str) -> Result<Attributes>;
}

/// What the cascade produced and which strategy produced it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadeOutcome {
    pub strategy: Option<&'static str>,
    pub attributes: Attributes,
}

pub struct IntrospectionCascade {
    strategies: Vec<Arc<dyn IntrospectionStrategy>>,
}

impl IntrospectionCascade {
    pub fn new(strategies: Vec<Arc<dyn IntrospectionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    pub async fn run(&self, address: &str) -> CascadeOutcome {
        for strategy in &self.strategies {
            match strategy.probe(address).await {
                Ok(attributes) if !attributes.is_empty() => {
                    info!(
                        address,
                        strategy = strategy.name(),
                        fields = attributes.len(),
                        "Introspection succeeded"
                    );
                    metrics::record_cascade_outcome(Some(strategy.name()));
                    return CascadeOutcome {
                        strategy: Some(strategy.name()),
                        attributes,
                    };
                }
                Ok(_) => debug!(address, strategy = strategy.name(), "Strategy returned nothing"),
                Err(e) => debug!(address, strategy = strategy.name(), error = %e, "Strategy failed"),
            }
        }

        metrics::record_cascade_outcome(None);
        CascadeOutcome::default()
    }
}

/// Build the default cascade from configuration
pub fn create_introspection_cascade(config: &AppConfig, network: Arc<dyn NetworkProbe>) -> IntrospectionCascade {
    let settings = &config.introspection;
    if !settings.enabled {
        return IntrospectionCascade::disabled();
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let credentials = Credentials::from_config(settings);
    let host_is_windows = cfg!(windows);

    IntrospectionCascade::new(vec![
        Arc::new(WmiQueryStrategy::new(
            runner.clone(),
            credentials.clone(),
            Duration::from_secs(settings.wmi_timeout_secs),
            host_is_windows,
        )),
        Arc::new(AdminShareStrategy::new(
            runner.clone(),
            credentials.clone(),
            Duration::from_secs(settings.smb_timeout_secs),
            host_is_windows,
        )),
        Arc::new(RemoteScriptStrategy::new(
            runner.clone(),
            credentials.clone(),
            Duration::from_secs(settings.powershell_timeout_secs),
            host_is_windows,
        )),
        Arc::new(LocalCommandStrategy::new(
            runner,
            credentials,
            Duration::from_secs(settings.net_view_timeout_secs),
            Duration::from_secs(settings.systeminfo_timeout_secs),
            host_is_windows,
        )),
        Arc::new(PortSignatureStrategy::new(
            network,
            settings.signature_ports.clone(),
            config.port_timeout(),
        )),
    ])
}

/// Account used for remote management calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub domain: Option<String>,
}

impl Credentials {
    pub fn from_config(config: &IntrospectionConfig) -> Option<Self> {
        let username = config.username.as_deref()?.trim();
        if username.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            password: config.password.clone().unwrap_or_default(),
            domain: config.domain.clone().filter(|d| !d.trim().is_empty()),
        })
    }

    /// `DOMAIN<sep>user`, or the bare user name
    fn qualified(&self, separator: char) -> String {
        match &self.domain {
            Some(domain) => format!("{}{}{}", domain, separator, self.username),
            None => self.username.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external programs with a time limit
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], limit: Duration) -> Result<CommandOutput>;
}

pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String], limit: Duration) -> Result<CommandOutput> {
        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(limit, child)
            .await
            .map_err(|_| ScannerError::command(program, format!("timed out after {:?}", limit)))?
            .map_err(|e| ScannerError::command(program, e.to_string()))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn text(value: impl Into<String>) -> Value {
    Value::String(value.into())
}

fn windows_marker(attributes: &mut Attributes) {
    attributes.insert("assetType".to_string(), text(AssetType::Windows.as_str()));
}

// ---------------------------------------------------------------------------
// WMI

/// Conversion applied to a raw WMI value
#[derive(Debug, Clone, Copy)]
enum WmiValue {
    Text,
    Integer,
    /// Kilobytes rendered as "N.NN GB"
    KilobytesAsGb,
    /// Bytes rendered as "N MB"
    BytesAsMb,
}

struct WmiQuery {
    class: &'static str,
    fields: &'static [(&'static str, &'static str, WmiValue)],
}

const WMI_QUERIES: &[WmiQuery] = &[
    WmiQuery {
        class: "Win32_OperatingSystem",
        fields: &[
            ("Caption", "osName", WmiValue::Text),
            ("Version", "osVersion", WmiValue::Text),
            ("OSArchitecture", "osArchitecture", WmiValue::Text),
            ("LastBootUpTime", "lastBootTime", WmiValue::Text),
            ("TotalVisibleMemorySize", "ramSize", WmiValue::KilobytesAsGb),
        ],
    },
    WmiQuery {
        class: "Win32_Processor",
        fields: &[
            ("Name", "cpuModel", WmiValue::Text),
            ("NumberOfCores", "cpuCores", WmiValue::Integer),
            ("NumberOfLogicalProcessors", "cpuThreads", WmiValue::Integer),
            ("Manufacturer", "cpuManufacturer", WmiValue::Text),
        ],
    },
    WmiQuery {
        class: "Win32_VideoController",
        fields: &[
            ("Name", "gpuName", WmiValue::Text),
            ("DriverVersion", "gpuDriver", WmiValue::Text),
            ("AdapterRAM", "gpuMemory", WmiValue::BytesAsMb),
        ],
    },
    WmiQuery {
        class: "Win32_ComputerSystem",
        fields: &[
            ("Manufacturer", "manufacturer", WmiValue::Text),
            ("Model", "model", WmiValue::Text),
            ("SystemType", "systemType", WmiValue::Text),
            ("Domain", "domain", WmiValue::Text),
            ("UserName", "lastUser", WmiValue::Text),
        ],
    },
];

fn convert_wmi_value(raw: &str, kind: WmiValue) -> Option<Value> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("(null)") {
        return None;
    }
    match kind {
        WmiValue::Text => Some(text(raw)),
        WmiValue::Integer => raw.parse::<u64>().ok().map(Value::from),
        WmiValue::KilobytesAsGb => raw
            .parse::<f64>()
            .ok()
            .map(|kb| text(format!("{:.2} GB", kb / (1024.0 * 1024.0)))),
        WmiValue::BytesAsMb => raw
            .parse::<u64>()
            .ok()
            .map(|bytes| text(format!("{} MB", bytes / (1024 * 1024)))),
    }
}

/// Parse either `Key=Value` list output or the `CLASS:` / header / row
/// table printed by the Samba `wmic` client. First row only.
pub fn parse_wmi_output(output: &str) -> Vec<(String, String)> {
    let list: Vec<(String, String)> = output
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .filter(|(key, _)| !key.is_empty() && !key.contains(' ') && !key.contains('|'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect();
    if !list.is_empty() {
        return list;
    }

    let mut rows = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("CLASS:"));
    let (Some(header), Some(values)) = (rows.next(), rows.next()) else {
        return Vec::new();
    };

    let columns: Vec<&str> = header.split('|').collect();
    columns
        .iter()
        .zip(values.splitn(columns.len(), '|'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

pub struct WmiQueryStrategy {
    runner: Arc<dyn CommandRunner>,
    credentials: Option<Credentials>,
    limit: Duration,
    host_is_windows: bool,
}

impl WmiQueryStrategy {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        credentials: Option<Credentials>,
        limit: Duration,
        host_is_windows: bool,
    ) -> Self {
        Self {
            runner,
            credentials,
            limit,
            host_is_windows,
        }
    }

    fn command(&self, address: &str, query: &WmiQuery) -> (&'static str, Vec<String>) {
        let names: Vec<&str> = query.fields.iter().map(|(name, _, _)| *name).collect();

        if self.host_is_windows {
            let mut args = vec![format!("/node:{}", address)];
            if let Some(credentials) = &self.credentials {
                args.push(format!("/user:{}", credentials.qualified('\\')));
                args.push(format!("/password:{}", credentials.password));
            }
            args.extend([
                "path".to_string(),
                query.class.to_string(),
                "get".to_string(),
                names.join(","),
                "/format:list".to_string(),
            ]);
            ("wmic", args)
        } else {
            let mut args = Vec::new();
            if let Some(credentials) = &self.credentials {
                args.push("-U".to_string());
                args.push(format!("{}%{}", credentials.qualified('/'), credentials.password));
            }
            args.push(format!("//{}", address));
            args.push(format!("SELECT {} FROM {}", names.join(","), query.class));
            ("wmic", args)
        }
    }

    async fn query(&self, address: &str, query: &WmiQuery) -> Result<Attributes> {
        let (program, args) = self.command(address, query);
        let output = self.runner.run(program, &args, self.limit).await?;
        if !output.success {
            return Err(ScannerError::command(
                program,
                format!("{} query failed: {}", query.class, output.stderr.trim()),
            ));
        }

        let raw = parse_wmi_output(&output.stdout);
        let mut attributes = Attributes::new();
        for (wmi_name, key, kind) in query.fields {
            let value = raw
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(wmi_name))
                .and_then(|(_, value)| convert_wmi_value(value, *kind));
            if let Some(value) = value {
                attributes.insert(key.to_string(), value);
            }
        }
        Ok(attributes)
    }
}

#[async_trait]
impl IntrospectionStrategy for WmiQueryStrategy {
    fn name(&self) -> &'static str {
        "wmi"
    }

    async fn probe(&self, address: &str) -> Result<Attributes> {
        if self.credentials.is_none() && !self.host_is_windows {
            debug!(address, "WMI skipped: no credentials configured");
            return Ok(Attributes::new());
        }

        let mut attributes = Attributes::new();
        for (index, query) in WMI_QUERIES.iter().enumerate() {
            match self.query(address, query).await {
                Ok(found) => attributes.extend(found),
                // Without the OS class there is nothing worth keeping
                Err(e) if index == 0 => return Err(e).with_strategy_context(self.name(), address),
                Err(e) => debug!(address, class = query.class, error = %e, "WMI class query failed"),
            }
        }

        if !attributes.is_empty() {
            attributes.insert("wmiAccessible".to_string(), Value::Bool(true));
        }
        Ok(attributes)
    }
}

// ---------------------------------------------------------------------------
// Administrative share

pub struct AdminShareStrategy {
    runner: Arc<dyn CommandRunner>,
    credentials: Option<Credentials>,
    limit: Duration,
    host_is_windows: bool,
}

impl AdminShareStrategy {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        credentials: Option<Credentials>,
        limit: Duration,
        host_is_windows: bool,
    ) -> Self {
        Self {
            runner,
            credentials,
            limit,
            host_is_windows,
        }
    }

    fn command(&self, address: &str) -> (&'static str, Vec<String>) {
        if self.host_is_windows {
            (
                "cmd",
                vec!["/C".to_string(), "dir".to_string(), format!("\\\\{}\\C$", address)],
            )
        } else {
            let mut args = vec![format!("//{}/C$", address)];
            match &self.credentials {
                Some(credentials) => {
                    args.push("-U".to_string());
                    args.push(format!("{}%{}", credentials.qualified('/'), credentials.password));
                }
                None => args.push("-N".to_string()),
            }
            args.extend(["-c".to_string(), "ls".to_string()]);
            ("smbclient", args)
        }
    }
}

#[async_trait]
impl IntrospectionStrategy for AdminShareStrategy {
    fn name(&self) -> &'static str {
        "smb"
    }

    async fn probe(&self, address: &str) -> Result<Attributes> {
        let (program, args) = self.command(address);
        let output = self
            .runner
            .run(program, &args, self.limit)
            .await
            .with_strategy_context(self.name(), address)?;

        let mut attributes = Attributes::new();
        if output.success {
            attributes.insert("smbAccessible".to_string(), Value::Bool(true));
            windows_marker(&mut attributes);
        }
        Ok(attributes)
    }
}

// ---------------------------------------------------------------------------
// PowerShell remoting

const SCRIPT_FIELDS: &[(&str, &str)] = &[
    ("OSName", "osName"),
    ("OSVersion", "osVersion"),
    ("OSArchitecture", "osArchitecture"),
    ("CPUModel", "cpuModel"),
    ("CPUCores", "cpuCores"),
    ("Manufacturer", "manufacturer"),
    ("Model", "model"),
    ("GPUName", "gpuName"),
    ("LastUser", "lastUser"),
];

const REMOTE_SCRIPT_BODY: &str = "$os = Get-CimInstance Win32_OperatingSystem; \
$cpu = Get-CimInstance Win32_Processor | Select-Object -First 1; \
$cs = Get-CimInstance Win32_ComputerSystem; \
$gpu = Get-CimInstance Win32_VideoController | Select-Object -First 1; \
[PSCustomObject]@{ OSName = $os.Caption; OSVersion = $os.Version; OSArchitecture = $os.OSArchitecture; \
MemoryGB = [math]::Round($cs.TotalPhysicalMemory / 1GB, 2); CPUModel = $cpu.Name; CPUCores = $cpu.NumberOfCores; \
Manufacturer = $cs.Manufacturer; Model = $cs.Model; GPUName = $gpu.Name; LastUser = $cs.UserName } | ConvertTo-Json -Compress";

fn powershell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Pull `"key": value` out of JSON-like text without requiring it to parse
pub fn extract_loose_field(output: &str, key: &str) -> Option<String> {
    let marker = format!("\"{}\"", key);
    let start = output.find(&marker)? + marker.len();
    let rest = output[start..].trim_start().strip_prefix(':')?.trim_start();

    let value = if let Some(quoted) = rest.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = quoted.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        value.push(escaped);
                    }
                }
                '"' => break,
                c => value.push(c),
            }
        }
        value
    } else {
        rest.split(|c| c == ',' || c == '}' || c == '\n')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let value = value.trim();
    (!value.is_empty() && value != "null").then(|| value.to_string())
}

pub struct RemoteScriptStrategy {
    runner: Arc<dyn CommandRunner>,
    credentials: Option<Credentials>,
    limit: Duration,
    host_is_windows: bool,
}

impl RemoteScriptStrategy {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        credentials: Option<Credentials>,
        limit: Duration,
        host_is_windows: bool,
    ) -> Self {
        Self {
            runner,
            credentials,
            limit,
            host_is_windows,
        }
    }

    fn script(&self, address: &str) -> String {
        let mut script = String::from("$ErrorActionPreference = 'Stop'; ");
        let credential_arg = match &self.credentials {
            Some(credentials) => {
                script.push_str(&format!(
                    "$pw = ConvertTo-SecureString {} -AsPlainText -Force; \
$cred = New-Object System.Management.Automation.PSCredential({}, $pw); ",
                    powershell_quote(&credentials.password),
                    powershell_quote(&credentials.qualified('\\'))
                ));
                " -Credential $cred"
            }
            None => "",
        };
        script.push_str(&format!(
            "Invoke-Command -ComputerName {}{} -ScriptBlock {{ {} }}",
            powershell_quote(address),
            credential_arg,
            REMOTE_SCRIPT_BODY
        ));
        script
    }

    /// Reads the script's JSON object, falling back to a loose field scan when
    /// the output is not valid JSON. Both OS and CPU fields must be present.
    pub fn parse_output(output: &str) -> Result<Attributes> {
        let parsed = match serde_json::from_str::<Value>(output.trim()) {
            Ok(Value::Object(object)) => Some(object),
            Ok(Value::Array(items)) => items.into_iter().find_map(|item| match item {
                Value::Object(object) => Some(object),
                _ => None,
            }),
            _ => None,
        };

        let field = |key: &str| -> Option<String> {
            match &parsed {
                Some(object) => object.get(key).and_then(json_field_text),
                None => extract_loose_field(output, key),
            }
        };

        let has_markers = match &parsed {
            Some(object) => object.contains_key("OSName") && object.contains_key("CPUModel"),
            None => output.contains("OSName") && output.contains("CPUModel"),
        };
        if !has_markers {
            return Err(ScannerError::introspection(
                "powershell",
                "-",
                "script output is missing OSName or CPUModel",
            ));
        }

        let mut attributes = Attributes::new();
        for (name, key) in SCRIPT_FIELDS {
            let value = field(*name).unwrap_or_else(|| UNKNOWN.to_string());
            attributes.insert(key.to_string(), text(value));
        }
        let ram = field("MemoryGB")
            .map(|gb| format!("{} GB", gb))
            .unwrap_or_else(|| UNKNOWN.to_string());
        attributes.insert("ramSize".to_string(), text(ram));
        Ok(attributes)
    }
}

fn json_field_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl IntrospectionStrategy for RemoteScriptStrategy {
    fn name(&self) -> &'static str {
        "powershell"
    }

    async fn probe(&self, address: &str) -> Result<Attributes> {
        let program = if self.host_is_windows { "powershell" } else { "pwsh" };
        let args = vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-Command".to_string(),
            self.script(address),
        ];

        let output = self
            .runner
            .run(program, &args, self.limit)
            .await
            .with_strategy_context(self.name(), address)?;
        if !output.success {
            return Err(ScannerError::introspection(self.name(), address, output.stderr.trim()));
        }

        Self::parse_output(&output.stdout).with_strategy_context(self.name(), address)
    }
}

// ---------------------------------------------------------------------------
// Local Windows commands

const SYSTEMINFO_FIELDS: &[(&str, &str)] = &[
    ("OS Name", "osName"),
    ("OS Version", "osVersion"),
    ("System Manufacturer", "manufacturer"),
    ("System Model", "model"),
    ("Total Physical Memory", "ramSize"),
];

/// Scrape `Key:   value` lines from `systeminfo` output
pub fn parse_systeminfo(output: &str) -> Attributes {
    let mut attributes = Attributes::new();
    for line in output.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let (label, value) = (label.trim(), value.trim());
        if value.is_empty() {
            continue;
        }
        if let Some((_, key)) = SYSTEMINFO_FIELDS.iter().find(|(name, _)| *name == label) {
            attributes.entry(key.to_string()).or_insert_with(|| text(value));
        }
    }
    attributes
}

pub struct LocalCommandStrategy {
    runner: Arc<dyn CommandRunner>,
    credentials: Option<Credentials>,
    net_view_limit: Duration,
    systeminfo_limit: Duration,
    host_is_windows: bool,
}

impl LocalCommandStrategy {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        credentials: Option<Credentials>,
        net_view_limit: Duration,
        systeminfo_limit: Duration,
        host_is_windows: bool,
    ) -> Self {
        Self {
            runner,
            credentials,
            net_view_limit,
            systeminfo_limit,
            host_is_windows,
        }
    }
}

#[async_trait]
impl IntrospectionStrategy for LocalCommandStrategy {
    fn name(&self) -> &'static str {
        "local-commands"
    }

    async fn probe(&self, address: &str) -> Result<Attributes> {
        if !self.host_is_windows {
            return Ok(Attributes::new());
        }

        let net_view = self
            .runner
            .run("net", &["view".to_string(), format!("\\\\{}", address)], self.net_view_limit)
            .await
            .with_strategy_context(self.name(), address)?;
        if !net_view.stdout.contains("Share name") {
            return Ok(Attributes::new());
        }

        let mut attributes = Attributes::new();
        attributes.insert("networked".to_string(), Value::Bool(true));
        windows_marker(&mut attributes);

        let mut args = vec!["/s".to_string(), address.to_string()];
        if let Some(credentials) = &self.credentials {
            args.extend([
                "/u".to_string(),
                credentials.qualified('\\'),
                "/p".to_string(),
                credentials.password.clone(),
            ]);
        }
        match self.runner.run("systeminfo", &args, self.systeminfo_limit).await {
            Ok(output) if output.success => attributes.extend(parse_systeminfo(&output.stdout)),
            Ok(output) => debug!(address, stderr = %output.stderr.trim(), "systeminfo failed"),
            Err(e) => debug!(address, error = %e, "systeminfo failed"),
        }

        Ok(attributes)
    }
}

// ---------------------------------------------------------------------------
// Port signature

pub struct PortSignatureStrategy {
    network: Arc<dyn NetworkProbe>,
    ports: Vec<ServicePort>,
    limit: Duration,
}

impl PortSignatureStrategy {
    pub fn new(network: Arc<dyn NetworkProbe>, ports: Vec<ServicePort>, limit: Duration) -> Self {
        Self { network, ports, limit }
    }
}

#[async_trait]
impl IntrospectionStrategy for PortSignatureStrategy {
    fn name(&self) -> &'static str {
        "port-signature"
    }

    async fn probe(&self, address: &str) -> Result<Attributes> {
        let ip = self.network.resolve_ip(address).await?;

        let checks = self.ports.iter().map(|service| async move {
            let open = self.network.is_port_open(ip, service.port, self.limit).await;
            (service, open)
        });
        let states = futures::future::join_all(checks).await;

        let mut attributes = Attributes::new();
        if states.iter().any(|(_, open)| *open) {
            attributes.insert("likelyWindows".to_string(), Value::Bool(true));
            windows_marker(&mut attributes);
            for (service, open) in states {
                attributes.insert(format!("{}Enabled", service.name.to_lowercase()), Value::Bool(open));
            }
        }
        Ok(attributes)
    }
}
