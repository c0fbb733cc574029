//! Blocking vim25 SOAP client.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use tracing::{debug, info, warn};

use super::soap::{self, MoRef};
use super::xml::Node;
use crate::cookie::SessionCookie;
use crate::error::{Error, Result};
use crate::inventory::{Inventory, PowerState, VirtualMachine};
use crate::lease::{DeviceUrl, Lease, LeaseInfo, LeaseState};
use crate::manifest::ManifestEntry;
use crate::stream::HttpFetcher;

/// Default vim25 API version sent in `SOAPAction`.
pub const DEFAULT_API_VERSION: &str = "6.7";

/// Connection settings for a vCenter or ESXi host.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Host name or address.
    pub host: String,
    /// HTTPS port (default 443).
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Use `https` for the SOAP endpoint (default). `false` selects `http`.
    pub use_tls: bool,
    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
    /// vim25 API version.
    pub api_version: String,
}

impl ConnectOptions {
    /// Options for `host` with default port, no certificate verification,
    /// and the default API version.
    pub fn new(host: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 443,
            user: user.into(),
            password: password.into(),
            use_tls: true,
            accept_invalid_certs: true,
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// SOAP endpoint URL.
    pub fn endpoint(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}/sdk", self.host, self.port)
    }
}

/// Managed objects from `ServiceContent` used by the export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContent {
    pub root_folder: MoRef,
    pub property_collector: MoRef,
    pub view_manager: MoRef,
    pub session_manager: MoRef,
    pub search_index: MoRef,
    pub ovf_manager: MoRef,
}

impl ServiceContent {
    /// Read the references out of a `RetrieveServiceContentResponse`.
    pub fn from_response(response: &Node) -> Result<Self> {
        let content = response
            .child("returnval")
            .ok_or_else(|| Error::soap("service content response has no returnval"))?;
        let get = |name: &str| {
            content
                .child(name)
                .ok_or_else(|| Error::soap(format!("service content has no {name}")))
                .and_then(MoRef::from_node)
        };
        Ok(Self {
            root_folder: get("rootFolder")?,
            property_collector: get("propertyCollector")?,
            view_manager: get("viewManager")?,
            session_manager: get("sessionManager")?,
            search_index: get("searchIndex")?,
            ovf_manager: get("ovfManager")?,
        })
    }
}

/// Authenticated SOAP transport shared by the client, VMs and leases.
struct Session {
    http: Client,
    endpoint: String,
    soap_action: String,
    host: String,
    cookie: String,
    accept_invalid_certs: bool,
}

impl Session {
    fn call(&self, method: &str, body: &str) -> Result<Node> {
        let cookie = request_cookie(&self.cookie);
        let (_, node) = post(&self.http, &self.endpoint, &self.soap_action, Some(cookie), method, body)?;
        Ok(node)
    }

    fn properties(&self, collector: &MoRef, obj: &MoRef, paths: &[&str]) -> Result<Option<Node>> {
        let response = self.call(
            "RetrievePropertiesEx",
            &soap::retrieve_properties(collector, obj, paths),
        )?;
        let mut objects = object_contents(response);
        Ok(if objects.is_empty() {
            None
        } else {
            Some(objects.swap_remove(0))
        })
    }
}

fn post(
    http: &Client,
    endpoint: &str,
    soap_action: &str,
    cookie: Option<&str>,
    method: &str,
    body: &str,
) -> Result<(Option<String>, Node)> {
    debug!(method, "SOAP call");
    let mut request = http
        .post(endpoint)
        .header(CONTENT_TYPE, "text/xml; charset=utf-8")
        .header("SOAPAction", soap_action)
        .body(soap::envelope(body));
    if let Some(cookie) = cookie {
        request = request.header(COOKIE, cookie);
    }

    let response = request.send()?;
    let status = response.status();
    let set_cookie = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let text = response.text()?;

    // Faults arrive with status 500, so parse before looking at the status.
    let envelope = match Node::parse(&text) {
        Ok(envelope) => envelope,
        Err(e) if !status.is_success() => {
            return Err(Error::soap(format!("{method} failed with HTTP {status}: {e}")))
        }
        Err(e) => return Err(e),
    };
    soap::check_fault(&envelope)?;
    if !status.is_success() {
        return Err(Error::soap(format!("{method} failed with HTTP {status}")));
    }
    Ok((set_cookie, soap::into_response(envelope, method)?))
}

/// The `name=value` part of a `Set-Cookie` header, used for SOAP calls.
fn request_cookie(set_cookie: &str) -> &str {
    set_cookie.split(';').next().unwrap_or(set_cookie).trim()
}

/// Objects of a `RetrievePropertiesEx` style response.
fn object_contents(mut response: Node) -> Vec<Node> {
    match response.take_child("returnval") {
        Some(returnval) => returnval
            .children
            .into_iter()
            .filter(|c| c.name == "objects")
            .collect(),
        None => Vec::new(),
    }
}

/// Continuation token of a paged `RetrievePropertiesEx` result.
fn continuation_token(response: &Node) -> Option<String> {
    response
        .path(&["returnval", "token"])
        .map(|t| t.text.clone())
        .filter(|t| !t.is_empty())
}

/// The `val` element of property `name` in an `ObjectContent`.
pub fn property<'a>(object: &'a Node, name: &str) -> Option<&'a Node> {
    object
        .children_named("propSet")
        .find(|p| p.child_text("name") == Some(name))
        .and_then(|p| p.child("val"))
}

fn property_text<'a>(object: &'a Node, name: &str) -> Option<&'a str> {
    property(object, name).map(|v| v.text.as_str())
}

/// Parse an `HttpNfcLeaseInfo` value.
///
/// Device URLs advertised with a `*` host are rewritten to `host`.
pub fn parse_lease_info(info: &Node, host: &str) -> Result<LeaseInfo> {
    let number = |node: &Node, name: &str| -> Result<Option<u64>> {
        node.child_text(name)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|e| Error::soap(format!("invalid {name} '{s}': {e}")))
            })
            .transpose()
    };

    let mut device_urls = Vec::new();
    for device in info.children_named("deviceUrl") {
        let url = device
            .child_text("url")
            .ok_or_else(|| Error::soap("lease device has no url"))?;
        device_urls.push(DeviceUrl {
            key: device.child_text("key").unwrap_or_default().to_string(),
            import_key: device.child_text("importKey").unwrap_or_default().to_string(),
            target_id: device
                .child_text("targetId")
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            url: resolve_host_placeholder(url, host),
            file_size: number(device, "fileSize")?,
            ssl_thumbprint: device.child_text("sslThumbprint").map(str::to_string),
        });
    }

    Ok(LeaseInfo {
        timeout_secs: number(info, "leaseTimeout")?.unwrap_or(0),
        total_disk_capacity_kb: number(info, "totalDiskCapacityInKB")?.unwrap_or(0),
        device_urls,
    })
}

/// Replace a `*` host in a transfer URL with the session host.
pub fn resolve_host_placeholder(url: &str, host: &str) -> String {
    for scheme in ["https://", "http://"] {
        if let Some(rest) = url.strip_prefix(scheme).and_then(|r| r.strip_prefix('*')) {
            return format!("{scheme}{host}{rest}");
        }
    }
    url.to_string()
}

/// Parse the `state` and `error` properties of a lease.
pub fn parse_lease_state(object: &Node) -> Result<LeaseState> {
    let state = property_text(object, "state")
        .ok_or_else(|| Error::soap("lease has no state property"))?;
    match state {
        "initializing" => Ok(LeaseState::Initializing),
        "ready" => Ok(LeaseState::Ready),
        "done" => Ok(LeaseState::Done),
        "error" => Ok(LeaseState::Error(
            property(object, "error")
                .map(soap::fault_message)
                .unwrap_or_else(|| "lease reported an error".to_string()),
        )),
        other => Err(Error::soap(format!("unknown lease state '{other}'"))),
    }
}

/// A connected vSphere session.
pub struct VsphereClient {
    session: Arc<Session>,
    content: ServiceContent,
}

impl VsphereClient {
    /// Connect and log in.
    pub fn connect(options: ConnectOptions) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()?;
        let endpoint = options.endpoint();
        let soap_action = format!("urn:vim25/{}", options.api_version);

        let (_, response) = post(
            &http,
            &endpoint,
            &soap_action,
            None,
            "RetrieveServiceContent",
            &soap::retrieve_service_content(),
        )?;
        let content = ServiceContent::from_response(&response)?;

        let (set_cookie, _) = post(
            &http,
            &endpoint,
            &soap_action,
            None,
            "Login",
            &soap::login(&content.session_manager, &options.user, &options.password),
        )?;
        let cookie = set_cookie.ok_or_else(|| Error::session("login response did not set a session cookie"))?;
        info!(host = %options.host, user = %options.user, "logged in");

        Ok(Self {
            session: Arc::new(Session {
                http,
                endpoint,
                soap_action,
                host: options.host,
                cookie,
                accept_invalid_certs: options.accept_invalid_certs,
            }),
            content,
        })
    }

    /// Raw session cookie as set by the server.
    pub fn session_cookie(&self) -> &str {
        &self.session.cookie
    }

    /// A device fetcher authenticated with this session.
    pub fn device_fetcher(&self) -> Result<HttpFetcher> {
        let cookie = SessionCookie::parse(&self.session.cookie)?;
        HttpFetcher::new(&cookie, self.session.accept_invalid_certs)
    }

    fn call(&self, method: &str, body: &str) -> Result<Node> {
        self.session.call(method, body)
    }

    fn logout(&self) -> Result<()> {
        self.call("Logout", &soap::logout(&self.content.session_manager))?;
        debug!("logged out");
        Ok(())
    }

    /// Name, instance UUID pairs of every VM under the root folder.
    fn list_vms(&self) -> Result<Vec<(String, String)>> {
        let response = self.call(
            "CreateContainerView",
            &soap::create_container_view(&self.content.view_manager, &self.content.root_folder, "VirtualMachine"),
        )?;
        let view = response
            .child("returnval")
            .ok_or_else(|| Error::soap("CreateContainerView returned no view"))
            .and_then(MoRef::from_node)?;

        let listed = self.collect_view(&view);

        if let Err(e) = self.call("DestroyView", &soap::destroy_view(&view)) {
            warn!(error = %e, %view, "failed to destroy container view");
        }
        listed
    }

    fn collect_view(&self, view: &MoRef) -> Result<Vec<(String, String)>> {
        let collector = &self.content.property_collector;
        let mut vms = Vec::new();
        let mut response = self.call(
            "RetrievePropertiesEx",
            &soap::retrieve_view_properties(
                collector,
                view,
                "VirtualMachine",
                &["summary.config.name", "summary.config.instanceUuid"],
            ),
        )?;

        loop {
            let token = continuation_token(&response);
            for object in object_contents(response) {
                if let (Some(name), Some(uuid)) = (
                    property_text(&object, "summary.config.name"),
                    property_text(&object, "summary.config.instanceUuid"),
                ) {
                    vms.push((name.to_string(), uuid.to_string()));
                }
            }
            match token {
                Some(token) => {
                    response = self.call(
                        "ContinueRetrievePropertiesEx",
                        &soap::continue_retrieve_properties(collector, &token),
                    )?;
                }
                None => return Ok(vms),
            }
        }
    }
}

impl Inventory for VsphereClient {
    fn find_vm_by_uuid(&self, uuid: &str) -> Result<Option<Box<dyn VirtualMachine>>> {
        let response = self.call("FindByUuid", &soap::find_by_uuid(&self.content.search_index, uuid))?;
        let Some(returnval) = response.child("returnval") else {
            return Ok(None);
        };
        let moref = MoRef::from_node(returnval)?;

        let object = self
            .session
            .properties(
                &self.content.property_collector,
                &moref,
                &["name", "runtime.powerState", "summary.storage.unshared"],
            )?
            .ok_or_else(|| Error::not_found(uuid))?;

        let name = property_text(&object, "name")
            .ok_or_else(|| Error::soap(format!("{moref} has no name")))?
            .to_string();
        let power = property_text(&object, "runtime.powerState").unwrap_or_default();
        let power_state = PowerState::from_vim(power)
            .ok_or_else(|| Error::soap(format!("unknown power state '{power}'")))?;
        let unshared = property_text(&object, "summary.storage.unshared")
            .unwrap_or("0")
            .parse::<u64>()
            .map_err(|e| Error::soap(format!("invalid unshared storage size: {e}")))?;

        debug!(%moref, %name, %power_state, unshared, "resolved VM");
        Ok(Some(Box::new(VsphereVm {
            session: Arc::clone(&self.session),
            content: self.content.clone(),
            moref,
            name,
            power_state,
            unshared,
        })))
    }

    fn find_vm_uuid_by_name(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .list_vms()?
            .into_iter()
            .find(|(vm_name, _)| vm_name == name)
            .map(|(_, uuid)| uuid))
    }
}

impl Drop for VsphereClient {
    fn drop(&mut self) {
        if let Err(e) = self.logout() {
            warn!(error = %e, "logout failed");
        }
    }
}

/// A VM resolved through [`VsphereClient`].
pub struct VsphereVm {
    session: Arc<Session>,
    content: ServiceContent,
    moref: MoRef,
    name: String,
    power_state: PowerState,
    unshared: u64,
}

impl VirtualMachine for VsphereVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn power_state(&self) -> PowerState {
        self.power_state
    }

    fn unshared_bytes(&self) -> u64 {
        self.unshared
    }

    fn export(&self) -> Result<Arc<dyn Lease>> {
        let response = self.session.call("ExportVm", &soap::export_vm(&self.moref))?;
        let lease = response
            .child("returnval")
            .ok_or_else(|| Error::soap("ExportVm returned no lease"))
            .and_then(MoRef::from_node)?;
        debug!(%lease, vm = %self.moref, "export lease requested");
        Ok(Arc::new(VsphereLease {
            session: Arc::clone(&self.session),
            collector: self.content.property_collector.clone(),
            moref: lease,
        }))
    }

    fn create_descriptor(&self, name: &str, files: &[ManifestEntry]) -> Result<String> {
        let response = self
            .session
            .call(
                "CreateDescriptor",
                &soap::create_descriptor(&self.content.ovf_manager, &self.moref, name, files),
            )
            .map_err(|e| Error::descriptor(e.to_string()))?;
        let result = response
            .child("returnval")
            .ok_or_else(|| Error::descriptor("CreateDescriptor returned no result"))?;

        if let Some(fault) = result.child("error") {
            return Err(Error::descriptor(soap::fault_message(fault)));
        }
        for warning in result.children_named("warning") {
            warn!(warning = %soap::fault_message(warning), "descriptor warning");
        }
        result
            .child_text("ovfDescriptor")
            .map(str::to_string)
            .ok_or_else(|| Error::descriptor("CreateDescriptor returned no descriptor"))
    }
}

/// An `HttpNfcLease` held through [`VsphereClient`].
pub struct VsphereLease {
    session: Arc<Session>,
    collector: MoRef,
    moref: MoRef,
}

impl VsphereLease {
    fn properties(&self, paths: &[&str]) -> Result<Node> {
        self.session
            .properties(&self.collector, &self.moref, paths)?
            .ok_or_else(|| Error::lease(format!("{} no longer exists", self.moref)))
    }
}

impl Lease for VsphereLease {
    fn state(&self) -> Result<LeaseState> {
        parse_lease_state(&self.properties(&["state", "error"])?)
    }

    fn info(&self) -> Result<LeaseInfo> {
        let object = self.properties(&["info"])?;
        let info = property(&object, "info").ok_or_else(|| Error::soap("lease has no info"))?;
        parse_lease_info(info, &self.session.host)
    }

    fn report_progress(&self, percent: u8) -> Result<()> {
        self.session.call(
            "HttpNfcLeaseProgress",
            &soap::lease_progress(&self.moref, percent.min(100)),
        )?;
        Ok(())
    }

    fn complete(&self) -> Result<()> {
        self.session
            .call("HttpNfcLeaseComplete", &soap::lease_complete(&self.moref))?;
        Ok(())
    }
}
