//! SOAP 1.1 envelope processing.
//!
//! Builds `Envelope / Header? / Body` around the handler output and parses
//! it back, dispatching header entries, the body and fault details to the
//! handlers bound on the [`MessageContext`].

use crate::error::{Result, WireError};
use crate::exchange::{first_claim, MessageContext, Phase};
use crate::xml::{
    expect_end, read_text, skip_whitespace, start_element, Element, QName, Token, TokenBuffer,
    TokenSink, TokenSource,
};

use super::fault::{FaultCode, SoapFault, SOAP_ENV_NS, SOAP_ENV_PREFIX};
use super::protocol::MessageProtocol;

fn env_name(local: &str) -> QName {
    QName::prefixed(SOAP_ENV_NS, SOAP_ENV_PREFIX, local)
}

/// SOAP 1.1 message protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoapProtocol;

impl SoapProtocol {
    /// Create the protocol.
    pub fn new() -> Self {
        SoapProtocol
    }
}

impl MessageProtocol for SoapProtocol {
    fn name(&self) -> &'static str {
        "soap11"
    }

    fn build(&self, ctx: &MessageContext, sink: &mut dyn TokenSink) -> Result<()> {
        sink.start(Element::declaring(env_name("Envelope")))?;

        let headers = ctx.out_handlers(Phase::Header);
        if !headers.is_empty() {
            sink.start(Element::new(env_name("Header")))?;
            for handler in &headers {
                handler.invoke(ctx, sink)?;
            }
            sink.end()?;
        }

        sink.start(Element::new(env_name("Body")))?;
        match ctx.fault() {
            Some(fault) => write_fault(fault, sink)?,
            None => {
                for handler in ctx.out_handlers(Phase::Body) {
                    handler.invoke(ctx, sink)?;
                }
            }
        }
        sink.end()?;
        sink.end()
    }

    fn parse(&self, ctx: &mut MessageContext, source: &mut dyn TokenSource) -> Result<()> {
        let envelope = start_element(source)?
            .ok_or_else(|| WireError::parse("message has no root element"))?;
        if !envelope.name.matches(Some(SOAP_ENV_NS), "Envelope") {
            if envelope.name.local == "Envelope" {
                return Err(SoapFault::new(
                    FaultCode::version_mismatch(),
                    format!(
                        "Unsupported envelope namespace {}",
                        envelope.name.namespace.as_deref().unwrap_or("(none)")
                    ),
                )
                .into());
            }
            return Err(WireError::parse(format!(
                "expected SOAP Envelope, found {}",
                envelope.name
            )));
        }

        let mut scope = NamespaceScope::default();
        scope.push(&envelope);

        let mut next = start_element(source)?;
        let is_header = next
            .as_ref()
            .is_some_and(|el| el.name.matches(Some(SOAP_ENV_NS), "Header"));
        if is_header {
            if let Some(header) = next.take() {
                parse_header(ctx, source, &header)?;
            }
            next = start_element(source)?;
        }
        let body = match next {
            Some(el) if el.name.matches(Some(SOAP_ENV_NS), "Body") => el,
            Some(el) => {
                return Err(WireError::parse(format!(
                    "expected SOAP Body, found {}",
                    el.name
                )))
            }
            None => return Err(WireError::parse("SOAP Envelope has no Body")),
        };
        scope.push(&body);
        parse_body(ctx, source, &body, &mut scope)?;

        // Trailing envelope children carry nothing we process.
        while let Some(extra) = start_element(source)? {
            tracing::trace!("Skipping envelope child {}", extra.name);
            subtree(extra, source)?;
        }
        expect_end(source, &envelope.name)?;
        skip_whitespace(source)
    }
}

fn write_fault(fault: &SoapFault, sink: &mut dyn TokenSink) -> Result<()> {
    sink.start(Element::new(env_name("Fault")))?;

    let code = fault.code();
    let mut code_element = Element::new(QName::local("faultcode"));
    if code.namespace() != SOAP_ENV_NS || code.wire_prefix() != SOAP_ENV_PREFIX {
        code_element = code_element.with_namespace(Some(code.wire_prefix()), code.namespace());
    }
    sink.start(code_element)?;
    sink.text(&code.to_string())?;
    sink.end()?;

    sink.text_element(QName::local("faultstring"), fault.message())?;
    if let Some(actor) = fault.actor() {
        sink.text_element(QName::local("faultactor"), actor)?;
    }
    if !fault.detail_writers().is_empty() {
        sink.start(Element::new(QName::local("detail")))?;
        for writer in fault.detail_writers() {
            writer.write_detail(sink)?;
        }
        sink.end()?;
    }
    sink.end()
}

fn must_understand(element: &Element) -> bool {
    matches!(
        element
            .attribute(Some(SOAP_ENV_NS), "mustUnderstand")
            .map(str::trim),
        Some("1") | Some("true")
    )
}

fn parse_header(
    ctx: &mut MessageContext,
    source: &mut dyn TokenSource,
    header: &Element,
) -> Result<()> {
    let handlers = ctx.in_handlers(Phase::Header);
    while let Some(entry) = start_element(source)? {
        let mandatory = must_understand(&entry);
        let name = entry.name.clone();
        let content = subtree(entry, source)?;
        match first_claim(&handlers, ctx, &content)? {
            Some(value) => ctx.push_header(name, value),
            None if mandatory => return Err(WireError::NotUnderstood(name)),
            None => tracing::trace!("Ignoring header {}", name),
        }
    }
    expect_end(source, &header.name)
}

fn parse_body(
    ctx: &mut MessageContext,
    source: &mut dyn TokenSource,
    body: &Element,
    scope: &mut NamespaceScope,
) -> Result<()> {
    let first = match start_element(source)? {
        Some(first) => first,
        None => return expect_end(source, &body.name),
    };

    if first.name.matches(Some(SOAP_ENV_NS), "Fault") {
        let fault = parse_fault(ctx, source, first, scope)?;
        tracing::debug!("Received fault {}", fault);
        ctx.set_fault(fault);
        while let Some(extra) = start_element(source)? {
            subtree(extra, source)?;
        }
        return expect_end(source, &body.name);
    }

    let mut content = subtree(first, source)?;
    while let Some(sibling) = start_element(source)? {
        for token in subtree(sibling, source)?.into_tokens() {
            content.write_token(token)?;
        }
    }
    expect_end(source, &body.name)?;

    let handlers = ctx.in_handlers(Phase::Body);
    if let Some(payload) = first_claim(&handlers, ctx, &content)? {
        ctx.set_body(payload);
    }
    Ok(())
}

fn parse_fault(
    ctx: &mut MessageContext,
    source: &mut dyn TokenSource,
    fault: Element,
    scope: &mut NamespaceScope,
) -> Result<SoapFault> {
    scope.push(&fault);
    let mut code = None;
    let mut message = None;
    let mut actor = None;
    let mut detail = None;

    while let Some(child) = start_element(source)? {
        match child.name.local.as_str() {
            "faultcode" => {
                scope.push(&child);
                let text = read_text(source)?;
                let resolved = scope.resolve_code(text.trim());
                scope.pop();
                code = Some(resolved?);
            }
            "faultstring" => message = Some(read_text(source)?),
            "faultactor" => actor = Some(read_text(source)?),
            "detail" => detail = parse_detail(ctx, source, &child)?,
            _ => {
                tracing::trace!("Skipping fault child {}", child.name);
                subtree(child, source)?;
            }
        }
    }
    expect_end(source, &fault.name)?;
    scope.pop();

    let code = code.ok_or_else(|| WireError::parse("SOAP Fault has no faultcode"))?;
    let mut parsed = SoapFault::new(code, message.unwrap_or_default());
    if let Some(actor) = actor {
        parsed = parsed.with_actor(actor);
    }
    if let Some(detail) = detail {
        parsed.set_detail(detail);
    }
    Ok(parsed)
}

/// Offer each detail entry to the fault handlers; once one is claimed the
/// remaining entries are skipped.
fn parse_detail(
    ctx: &mut MessageContext,
    source: &mut dyn TokenSource,
    detail: &Element,
) -> Result<Option<crate::exchange::Payload>> {
    let handlers = ctx.in_handlers(Phase::BodyFault);
    let mut claimed = None;
    while let Some(entry) = start_element(source)? {
        let content = subtree(entry, source)?;
        if claimed.is_none() {
            claimed = first_claim(&handlers, ctx, &content)?;
        }
    }
    expect_end(source, &detail.name)?;
    Ok(claimed)
}

/// Collect an element whose start tag was just consumed, up to and
/// including its end tag.
fn subtree(start: Element, source: &mut dyn TokenSource) -> Result<TokenBuffer> {
    let mut buffer = TokenBuffer::new();
    buffer.start(start)?;
    let mut depth = 1usize;
    while depth > 0 {
        let token = source
            .next_token()?
            .ok_or_else(|| WireError::parse("unexpected end of token stream"))?;
        match &token {
            Token::Start(_) => depth += 1,
            Token::End => depth -= 1,
            Token::Text(_) => {}
        }
        buffer.write_token(token)?;
    }
    Ok(buffer)
}

/// Prefix bindings along the path to the element being read.
#[derive(Debug, Default)]
struct NamespaceScope {
    frames: Vec<Vec<(Option<String>, String)>>,
}

impl NamespaceScope {
    fn push(&mut self, element: &Element) {
        let mut frame: Vec<_> = element
            .namespaces
            .iter()
            .map(|ns| (ns.prefix.clone(), ns.uri.clone()))
            .collect();
        if let Some(uri) = &element.name.namespace {
            frame.push((element.name.prefix.clone(), uri.clone()));
        }
        self.frames.push(frame);
    }

    fn pop(&mut self) {
        self.frames.pop();
    }

    fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter())
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// Resolve `prefix:Local` fault code text.
    fn resolve_code(&self, text: &str) -> Result<FaultCode> {
        match text.split_once(':') {
            Some((prefix, local)) => {
                let uri = self.resolve(Some(prefix)).ok_or_else(|| {
                    WireError::parse(format!("undeclared faultcode prefix '{}'", prefix))
                })?;
                FaultCode::new(Some(uri), Some(prefix), local)
            }
            None => {
                let uri = self.resolve(None).unwrap_or(SOAP_ENV_NS);
                FaultCode::new(Some(uri), None, text)
            }
        }
    }
}
