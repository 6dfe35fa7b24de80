use hostbroker_domain::{Machine, Request, Template};

/// Render a list of requests as a human-readable table.
pub fn render_requests(requests: &[Request]) -> String {
    if requests.is_empty() {
        return "No requests.".to_string();
    }
    let mut out = String::new();
    for r in requests {
        out.push_str(&format!(
            "{}  {:<10}  {:<12}  {}/{} instances\n",
            r.request_id,
            format!("{:?}", r.request_type),
            format!("{:?}", r.status),
            r.instance_ids.len(),
            r.requested_count
        ));
    }
    out
}

/// Render a single request plus its machines.
pub fn render_status(request: &Request, machines: &[Machine]) -> String {
    let mut out = format!(
        "request {}  status={:?}  template={}\n",
        request.request_id, request.status, request.template_id
    );
    if let Some(msg) = &request.status_message {
        out.push_str(&format!("  message: {}\n", msg));
    }
    for m in machines {
        out.push_str(&format!(
            "  {}  {:<10}  type={}  ip={}\n",
            m.instance_id,
            m.status.to_string(),
            m.instance_type,
            m.private_ip.as_deref().unwrap_or("-")
        ));
    }
    out
}

/// Render the registered templates as a table.
pub fn render_templates(templates: &[Template]) -> String {
    if templates.is_empty() {
        return "No templates.".to_string();
    }
    let mut out = String::new();
    for t in templates {
        out.push_str(&format!(
            "{:<24}  {:<12}  {:<12}  {}\n",
            t.template_id, t.instance_type, t.provider_api, t.image_id
        ));
    }
    out
}
