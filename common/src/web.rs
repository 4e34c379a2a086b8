//! Request handling for the status surface, independent of the HTTP server.

use std::time::Duration;

use crate::{
    clock::format_uptime,
    error::UpdateError,
    multipart::{boundary_from_content_type, MultipartFilter},
    status::StatusSnapshot,
    templates::{CONTENT_PLACEHOLDER, STATUS_PAGE, UPDATE_PAGE, VERSION_PLACEHOLDER},
    update::{ChunkReader, ImageReport, ImageWriter, UpdateGate, UpdateTarget},
};

pub const UPLOAD_CHUNK_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    StatusPage,
    Data,
    UpdateForm,
    UpdateUpload,
    NotFound,
}

pub fn route(method: Method, path: &str) -> Route {
    let path = path.split_once('?').map_or(path, |(path, _)| path);
    match (method, path) {
        (Method::Get, "/") => Route::StatusPage,
        (Method::Get, "/data") => Route::Data,
        (Method::Get, "/update") => Route::UpdateForm,
        (Method::Post, "/update") => Route::UpdateUpload,
        _ => Route::NotFound,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn html(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "text/html",
            body,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
        }
    }
}

pub fn render_template(template: &[u8], placeholder: &str, value: &str) -> Vec<u8> {
    let needle = placeholder.as_bytes();
    let mut out = Vec::with_capacity(template.len() + value.len());
    let mut rest = template;
    while let Some(at) = rest.windows(needle.len()).position(|window| window == needle) {
        out.extend_from_slice(&rest[..at]);
        out.extend_from_slice(value.as_bytes());
        rest = &rest[at + needle.len()..];
    }
    out.extend_from_slice(rest);
    out
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn status_content(snapshot: &StatusSnapshot, uptime: Duration) -> String {
    let mut rows = vec![
        ("Room", None, snapshot.display_name.clone()),
        ("Hardware ID", None, snapshot.hardware_id.clone()),
        ("Firmware", None, snapshot.firmware_version.clone()),
        ("Last reading", Some("time"), snapshot.last.timestamp.clone()),
        ("Temperature", Some("temperature"), snapshot.last.temperature.clone()),
        ("Humidity", Some("humidity"), snapshot.last.humidity.clone()),
    ];
    if snapshot.battery_powered {
        rows.push(("Battery", Some("voltage"), snapshot.last.voltage.clone()));
    }
    rows.push(("Uptime", Some("uptime"), format_uptime(uptime)));
    rows.push(("Boots", None, snapshot.boot_count.to_string()));
    rows.push(("Successful cycles", None, snapshot.success_count.to_string()));

    let mut html = String::from("<dl>");
    for (label, id, value) in rows {
        html.push_str(&format!("<dt>{label}</dt>"));
        match id {
            Some(id) => html.push_str(&format!("<dd id=\"{id}\">{}</dd>", escape_html(&value))),
            None => html.push_str(&format!("<dd>{}</dd>", escape_html(&value))),
        }
    }
    html.push_str("</dl>");
    html
}

/// Answers the read-only routes. Uploads go through [`receive_upload`].
pub fn respond(route: Route, snapshot: &StatusSnapshot, uptime: Duration) -> HttpResponse {
    match route {
        Route::StatusPage => HttpResponse::html(render_template(
            STATUS_PAGE,
            CONTENT_PLACEHOLDER,
            &status_content(snapshot, uptime),
        )),
        Route::Data => match serde_json::to_vec(&snapshot.data_payload(format_uptime(uptime))) {
            Ok(body) => HttpResponse {
                status: 200,
                content_type: "application/json",
                body,
            },
            Err(err) => HttpResponse::text(500, &err.to_string()),
        },
        Route::UpdateForm => HttpResponse::html(render_template(
            UPDATE_PAGE,
            VERSION_PLACEHOLDER,
            &snapshot.firmware_version,
        )),
        Route::UpdateUpload => HttpResponse::text(405, "upload requires a request body"),
        Route::NotFound => HttpResponse::text(404, "Not found"),
    }
}

/// Streams a multipart upload body into the update target.
pub fn receive_upload(
    content_type: Option<&str>,
    body: &mut dyn ChunkReader,
    target: &mut dyn UpdateTarget,
) -> Result<ImageReport, UpdateError> {
    let boundary = content_type
        .and_then(boundary_from_content_type)
        .ok_or(UpdateError::Multipart("missing multipart boundary"))?;

    let mut filter = MultipartFilter::new(&boundary);
    let mut writer = ImageWriter::begin(target, None)?;
    let mut chunk = vec![0_u8; UPLOAD_CHUNK_SIZE];

    loop {
        let read = body.read_chunk(&mut chunk)?;
        if read == 0 {
            break;
        }
        filter.feed(&chunk[..read], |bytes| writer.write(bytes))?;
        if filter.is_done() {
            break;
        }
    }

    filter.finish()?;
    writer.finish()
}

/// Claims the staging area for an upload. Refused while the version check
/// holds it or a staged image is waiting for its restart.
pub fn accept_upload(
    gate: &UpdateGate,
    content_type: Option<&str>,
    body: &mut dyn ChunkReader,
    target: &mut dyn UpdateTarget,
) -> Result<ImageReport, UpdateError> {
    let claim = gate.try_claim().ok_or(UpdateError::Busy)?;
    let report = receive_upload(content_type, body, target)?;
    claim.mark_staged();
    Ok(report)
}

pub fn upload_response(result: &Result<ImageReport, UpdateError>) -> HttpResponse {
    match result {
        Ok(_) => HttpResponse::text(200, "OK"),
        Err(_) => HttpResponse::text(500, "FAIL"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        fakes::FakeUpdateTarget,
        status::SensorReading,
        update::IoReader,
    };

    fn snapshot() -> StatusSnapshot {
        let mut snapshot = StatusSnapshot::new("30:C6:F7:44:0D:58", "lounge", "Lounge", "1.2.0", false);
        snapshot.record_success(
            &SensorReading {
                temperature_c: 21.5,
                humidity_pct: 40.0,
                success: true,
            },
            None,
            "05/01/26 11:00:00",
        );
        snapshot
    }

    fn upload_body(payload: &[u8]) -> Vec<u8> {
        let mut body = b"--XyZ\r\nContent-Disposition: form-data; name=\"update\"; filename=\"fw.bin\"\r\n\r\n".to_vec();
        body.extend_from_slice(payload);
        body.extend_from_slice(b"\r\n--XyZ--\r\n");
        body
    }

    #[test]
    fn routes_by_method_and_path() {
        assert_eq!(route(Method::Get, "/"), Route::StatusPage);
        assert_eq!(route(Method::Get, "/data?t=1"), Route::Data);
        assert_eq!(route(Method::Get, "/update"), Route::UpdateForm);
        assert_eq!(route(Method::Post, "/update"), Route::UpdateUpload);
        assert_eq!(route(Method::Post, "/"), Route::NotFound);
        assert_eq!(route(Method::Get, "/missing"), Route::NotFound);
    }

    #[test]
    fn substitutes_every_placeholder_occurrence() {
        assert_eq!(
            render_template(b"a{{x}}b{{x}}", "{{x}}", "Z"),
            b"aZbZ".to_vec()
        );
        assert_eq!(render_template(b"plain", "{{x}}", "Z"), b"plain".to_vec());
    }

    #[test]
    fn status_page_embeds_last_reading() {
        let response = respond(Route::StatusPage, &snapshot(), Duration::from_secs(61));
        let body = String::from_utf8(response.body).unwrap();

        assert_eq!(response.status, 200);
        assert!(body.contains("<dd id=\"temperature\">21.50</dd>"));
        assert!(body.contains("<dd id=\"uptime\">00:01:01</dd>"));
        assert!(!body.contains("{{content}}"));
        assert!(!body.contains("id=\"voltage\""));
    }

    #[test]
    fn data_route_returns_json_snapshot() {
        let response = respond(Route::Data, &snapshot(), Duration::from_secs(5));
        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();

        assert_eq!(response.content_type, "application/json");
        assert_eq!(json["temperature"], "21.50");
        assert_eq!(json["voltage"], "unknown");
        assert_eq!(json["time"], "05/01/26 11:00:00");
        assert_eq!(json["uptime"], "00:00:05");
    }

    #[test]
    fn update_form_shows_running_version() {
        let response = respond(Route::UpdateForm, &snapshot(), Duration::ZERO);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains("Running version 1.2.0"));
    }

    #[test]
    fn upload_streams_file_part_into_target() {
        let payload = vec![0x5A_u8; 6_000];
        let mut body = IoReader(Cursor::new(upload_body(&payload)));
        let mut target = FakeUpdateTarget::default();

        let result = receive_upload(
            Some("multipart/form-data; boundary=XyZ"),
            &mut body,
            &mut target,
        );

        assert_eq!(upload_response(&result), HttpResponse::text(200, "OK"));
        assert_eq!(target.staged, payload);
        assert!(target.finalized);
    }

    #[test]
    fn failed_upload_answers_fail_and_aborts() {
        let mut body = IoReader(Cursor::new(upload_body(b"")));
        let mut target = FakeUpdateTarget::default();

        let result = receive_upload(
            Some("multipart/form-data; boundary=XyZ"),
            &mut body,
            &mut target,
        );

        assert_eq!(result, Err(UpdateError::Empty));
        assert_eq!(upload_response(&result).body, b"FAIL".to_vec());
        assert!(target.aborted);
        assert!(!target.finalized);
    }

    #[test]
    fn upload_is_refused_while_staging_area_is_claimed() {
        let gate = UpdateGate::new();
        let _check = gate.try_claim().unwrap();
        let mut body = IoReader(Cursor::new(upload_body(b"new image")));
        let mut target = FakeUpdateTarget::default();

        let result = accept_upload(
            &gate,
            Some("multipart/form-data; boundary=XyZ"),
            &mut body,
            &mut target,
        );

        assert_eq!(result, Err(UpdateError::Busy));
        assert_eq!(upload_response(&result), HttpResponse::text(500, "FAIL"));
        assert!(!target.began);
    }

    #[test]
    fn accepted_upload_leaves_restart_pending() {
        let gate = UpdateGate::new();
        let mut body = IoReader(Cursor::new(upload_body(b"new image")));
        let mut target = FakeUpdateTarget::default();

        let result = accept_upload(
            &gate,
            Some("multipart/form-data; boundary=XyZ"),
            &mut body,
            &mut target,
        );

        assert!(result.is_ok());
        assert!(gate.restart_pending());
        assert!(gate.try_claim().is_none());
    }

    #[test]
    fn upload_without_boundary_never_touches_target() {
        let mut body = IoReader(Cursor::new(b"raw".to_vec()));
        let mut target = FakeUpdateTarget::default();

        let result = receive_upload(Some("application/octet-stream"), &mut body, &mut target);

        assert!(matches!(result, Err(UpdateError::Multipart(_))));
        assert!(!target.began);
    }
}
