//! vim25 SOAP request bodies and response helpers.

use std::borrow::Cow;

use quick_xml::escape::escape;

use super::xml::Node;
use crate::error::{Error, Result};
use crate::manifest::ManifestEntry;

/// A managed object reference, e.g. `VirtualMachine:vm-42`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoRef {
    pub kind: String,
    pub value: String,
}

impl MoRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Read a reference from an element carrying a `type` attribute.
    pub fn from_node(node: &Node) -> Result<Self> {
        let kind = node
            .attr("type")
            .ok_or_else(|| Error::soap(format!("<{}> is not a managed object reference", node.name)))?;
        if node.text.is_empty() {
            return Err(Error::soap(format!("<{}> has an empty reference", node.name)));
        }
        Ok(Self::new(kind, node.text.clone()))
    }

    /// Render as `<tag type="Kind">value</tag>`.
    pub fn to_xml(&self, tag: &str) -> String {
        format!(
            "<{tag} type=\"{}\">{}</{tag}>",
            esc(&self.kind),
            esc(&self.value)
        )
    }
}

impl std::fmt::Display for MoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

fn esc(s: &str) -> Cow<'_, str> {
    escape(s)
}

/// Wrap a request body in a SOAP envelope.
pub fn envelope(body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenc="http://schemas.xmlsoap.org/soap/encoding/" "#,
            r#"xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
            "<soapenv:Body>{}</soapenv:Body></soapenv:Envelope>"
        ),
        body
    )
}

fn method(name: &str, this: &MoRef, params: &str) -> String {
    format!(
        r#"<{name} xmlns="urn:vim25">{}{params}</{name}>"#,
        this.to_xml("_this")
    )
}

fn element(tag: &str, value: impl std::fmt::Display) -> String {
    let value = value.to_string();
    format!("<{tag}>{}</{tag}>", esc(&value))
}

/// The well-known service instance reference.
pub fn service_instance() -> MoRef {
    MoRef::new("ServiceInstance", "ServiceInstance")
}

pub fn retrieve_service_content() -> String {
    method("RetrieveServiceContent", &service_instance(), "")
}

pub fn login(session_manager: &MoRef, user: &str, password: &str) -> String {
    let params = element("userName", user) + &element("password", password);
    method("Login", session_manager, &params)
}

pub fn logout(session_manager: &MoRef) -> String {
    method("Logout", session_manager, "")
}

/// `SearchIndex.FindByUuid` over VMs by instance UUID, in all datacenters.
pub fn find_by_uuid(search_index: &MoRef, uuid: &str) -> String {
    let params = element("uuid", uuid) + &element("vmSearch", true) + &element("instanceUuid", true);
    method("FindByUuid", search_index, &params)
}

pub fn create_container_view(view_manager: &MoRef, container: &MoRef, kind: &str) -> String {
    let params = container.to_xml("container") + &element("type", kind) + &element("recursive", true);
    method("CreateContainerView", view_manager, &params)
}

pub fn destroy_view(view: &MoRef) -> String {
    method("DestroyView", view, "")
}

fn property_spec(kind: &str, paths: &[&str]) -> String {
    let path_set: String = paths.iter().map(|p| element("pathSet", p)).collect();
    format!("<propSet>{}{path_set}</propSet>", element("type", kind))
}

/// `RetrievePropertiesEx` for a single object.
pub fn retrieve_properties(collector: &MoRef, obj: &MoRef, paths: &[&str]) -> String {
    let params = format!(
        "<specSet>{}<objectSet>{}{}</objectSet></specSet><options/>",
        property_spec(&obj.kind, paths),
        obj.to_xml("obj"),
        element("skip", false),
    );
    method("RetrievePropertiesEx", collector, &params)
}

/// `RetrievePropertiesEx` for every `kind` object in a container view.
pub fn retrieve_view_properties(collector: &MoRef, view: &MoRef, kind: &str, paths: &[&str]) -> String {
    let traversal = format!(
        r#"<selectSet xsi:type="TraversalSpec">{}{}{}{}</selectSet>"#,
        element("name", "traverseEntities"),
        element("type", &view.kind),
        element("path", "view"),
        element("skip", false),
    );
    let params = format!(
        "<specSet>{}<objectSet>{}{}{traversal}</objectSet></specSet><options/>",
        property_spec(kind, paths),
        view.to_xml("obj"),
        element("skip", true),
    );
    method("RetrievePropertiesEx", collector, &params)
}

pub fn continue_retrieve_properties(collector: &MoRef, token: &str) -> String {
    method("ContinueRetrievePropertiesEx", collector, &element("token", token))
}

pub fn export_vm(vm: &MoRef) -> String {
    method("ExportVm", vm, "")
}

pub fn lease_progress(lease: &MoRef, percent: u8) -> String {
    method("HttpNfcLeaseProgress", lease, &element("percent", percent))
}

pub fn lease_complete(lease: &MoRef) -> String {
    method("HttpNfcLeaseComplete", lease, "")
}

/// `OvfManager.CreateDescriptor` listing the downloaded files.
pub fn create_descriptor(ovf_manager: &MoRef, vm: &MoRef, name: &str, files: &[ManifestEntry]) -> String {
    let ovf_files: String = files
        .iter()
        .map(|f| {
            format!(
                "<ovfFiles>{}{}{}</ovfFiles>",
                element("deviceId", &f.device_key),
                element("path", &f.path),
                element("size", f.size),
            )
        })
        .collect();
    let params = format!("{}<cdp>{ovf_files}{}</cdp>", vm.to_xml("obj"), element("name", name));
    method("CreateDescriptor", ovf_manager, &params)
}

/// Return an error if the envelope carries a SOAP fault.
pub fn check_fault(envelope: &Node) -> Result<()> {
    let Some(fault) = envelope.path(&["Body", "Fault"]) else {
        return Ok(());
    };
    let message = fault
        .child_text("faultstring")
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            fault
                .path(&["detail"])
                .and_then(|d| d.children.first())
                .map(|d| d.name.clone())
        })
        .unwrap_or_else(|| "unknown SOAP fault".to_string());
    Err(Error::soap(message))
}

/// Take the `<{method}Response>` element out of a response envelope.
pub fn into_response(mut envelope: Node, method: &str) -> Result<Node> {
    check_fault(&envelope)?;
    let wanted = format!("{method}Response");
    envelope
        .take_child("Body")
        .and_then(|mut body| body.take_child(&wanted))
        .ok_or_else(|| Error::soap(format!("response has no <{wanted}>")))
}

/// Human-readable message of a `LocalizedMethodFault`.
pub fn fault_message(fault: &Node) -> String {
    fault
        .child_text("localizedMessage")
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| fault.child("fault").and_then(|f| f.attr("xsi:type")).map(str::to_string))
        .unwrap_or_else(|| "unspecified fault".to_string())
}
