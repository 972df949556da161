//! Per-header-field parsing. Each header's *value* (the text after the
//! colon, already unfolded) is parsed here; `parser::message` handles
//! splitting the raw header block into name/value lines.
//!
//! Grammar grounded in `nom` combinators, the same idiom as
//! `parser::uri` (itself grounded on `rvoip_sip_core::parser::uri`).

use nom::{
    branch::alt,
    bytes::complete::{take_till, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map, map_res, opt, recognize, rest},
    multi::{many0, many1, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::error::{Error, HeaderField};
use crate::types::header::{CSeq, NameAddr};
use crate::types::method::Method;
use crate::types::param::Param;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;
use crate::types::via::Via;

fn bad(field: HeaderField, detail: impl Into<String>) -> Error {
    Error::Validation { field, status: StatusCode::BadRequest, detail: detail.into() }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-.!%*_+`'~".contains(c)
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(is_token_char)(input)
}

/// SIP linear whitespace, already unfolded by `parser::message`.
fn sws(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c == ' ' || c == '\t')(input)
}

fn sws1(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c == ' ' || c == '\t')(input)
}

fn quoted_string(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_till(|c: char| c == '"'), char('"'))(input)
}

fn bracketed(input: &str) -> IResult<&str, &str> {
    delimited(char('<'), take_till(|c: char| c == '>'), char('>'))(input)
}

fn generic_param(input: &str) -> IResult<&str, Param> {
    map(
        pair(token, opt(preceded(char('='), alt((quoted_string, token))))),
        |(name, value)| Param::new(name, value.map(|v| v.to_string())),
    )(input)
}

fn param_list(input: &str) -> IResult<&str, Vec<Param>> {
    many0(preceded(tuple((sws, char(';'), sws)), generic_param))(input)
}

/// Parse a header's trailing `;param=value...` tail, leniently: malformed
/// trailing text yields no params rather than an error.
fn trailing_params(params_str: &str) -> Vec<Param> {
    match all_consuming(param_list)(params_str.trim_end()) {
        Ok((_, p)) => p,
        Err(_) => Vec::new(),
    }
}

fn sent_protocol(input: &str) -> IResult<&str, &str> {
    map(tuple((token, char('/'), token, char('/'), token)), |(_, _, _, _, transport)| transport)(input)
}

fn via_host(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('['), take_till(|c: char| c == ']'), char(']')),
        take_while1(|c: char| c != ':' && c != ';' && c != ' ' && c != '\t'),
    ))(input)
}

fn via_sent_by(input: &str) -> IResult<&str, (&str, Option<u16>)> {
    pair(via_host, opt(preceded(char(':'), map_res(digit1, |s: &str| s.parse::<u16>()))))(input)
}

/// Parse a single Via header value: `SIP/2.0/UDP host:port;branch=...`.
pub fn parse_via(value: &str) -> Result<Via, Error> {
    let value = value.trim();
    let parsed = tuple((sent_protocol, sws1, via_sent_by, param_list))(value);
    let (transport, host, port, params) = match parsed {
        Ok((_, (transport, _, (host, port), params))) => {
            (transport.to_ascii_uppercase(), host.to_string(), port, params)
        }
        Err(_) => return Err(bad(HeaderField::Via, format!("malformed Via: {value}"))),
    };

    let branch = params
        .iter()
        .find(|p| p.name_eq("branch"))
        .and_then(|p| p.value.clone())
        .ok_or_else(|| bad(HeaderField::Via, "Via missing branch parameter"))?;

    let received = params.iter().find(|p| p.name_eq("received")).and_then(|p| p.value.clone());
    let rport = params.iter().find(|p| p.name_eq("rport")).map(|p| p.value.as_ref().and_then(|v| v.parse::<u16>().ok()));
    let other_params = params
        .into_iter()
        .filter(|p| !p.name_eq("branch") && !p.name_eq("received") && !p.name_eq("rport"))
        .collect();

    Ok(Via { transport, host, port, branch, received, rport, other_params })
}

fn quoted_display_name(input: &str) -> IResult<&str, &str> {
    quoted_string(input)
}

fn token_display_name(input: &str) -> IResult<&str, &str> {
    recognize(many1(terminated(token, sws)))(input)
}

/// `display-name <uri>params` / bare-`uri params`, returning the raw slices
/// so the caller can run them through `Uri::from_str_checked` / `param_list`.
fn name_addr(input: &str) -> IResult<&str, (Option<String>, &str, &str)> {
    alt((
        map(tuple((sws, quoted_display_name, sws, bracketed, rest)), |(_, dn, _, uri, params)| {
            (Some(dn.to_string()), uri, params)
        }),
        map(tuple((sws, token_display_name, bracketed, rest)), |(_, dn, uri, params)| {
            let dn = dn.trim();
            (if dn.is_empty() { None } else { Some(dn.to_string()) }, uri, params)
        }),
        map(tuple((sws, bracketed, rest)), |(_, uri, params)| (None, uri, params)),
        map(tuple((sws, take_while1(|c: char| c != ';'), rest)), |(_, uri, params): (_, &str, &str)| {
            (None, uri.trim(), params)
        }),
    ))(input)
}

/// Parse a `display-name <uri>;params` or bare-`uri;params` value, used for
/// From/To/Contact (and Route/Record-Route, which use the same grammar).
pub fn parse_name_addr(value: &str, field: HeaderField) -> Result<NameAddr, Error> {
    let value = value.trim();
    let (display_name, uri_str, params_str) = match all_consuming(name_addr)(value) {
        Ok((_, v)) => v,
        Err(_) => return Err(bad(field, format!("malformed name-addr: {value}"))),
    };
    let uri = Uri::from_str_checked(uri_str, field)?;
    let params = trailing_params(params_str);
    Ok(NameAddr { display_name, uri, params })
}

trait FromStrChecked: Sized {
    fn from_str_checked(s: &str, field: HeaderField) -> Result<Self, Error>;
}

impl FromStrChecked for Uri {
    fn from_str_checked(s: &str, field: HeaderField) -> Result<Self, Error> {
        crate::parser::uri::parse_uri_complete(s).map_err(|_| bad(field, format!("invalid URI: {s}")))
    }
}

fn list_item(input: &str) -> IResult<&str, &str> {
    recognize(many1(alt((recognize(quoted_string), recognize(bracketed), nom::bytes::complete::is_not(",\"<")))))(input)
}

/// Split a comma-separated list of name-addrs, respecting `<...>` and
/// quoted-string boundaries (commas inside either are not separators).
pub fn split_comma_list(value: &str) -> Vec<String> {
    match separated_list1(char(','), list_item)(value) {
        Ok((_, items)) => items.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        Err(_) => Vec::new(),
    }
}

fn cseq_value(input: &str) -> IResult<&str, (u32, &str)> {
    nom::sequence::separated_pair(map_res(digit1, |s: &str| s.parse::<u32>()), sws1, token)(input)
}

/// Parse a CSeq header value: `<number> <method>`.
pub fn parse_cseq(value: &str) -> Result<CSeq, Error> {
    let value = value.trim();
    let (seq, method) = match all_consuming(cseq_value)(value) {
        Ok((_, v)) => v,
        Err(_) => return Err(bad(HeaderField::CSeq, format!("malformed CSeq: {value}"))),
    };
    let method: Method = method.parse().map_err(|_| bad(HeaderField::CSeq, format!("malformed CSeq method: {method}")))?;
    Ok(CSeq { seq, method })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_via_with_rport_and_received() {
        let via = parse_via("SIP/2.0/UDP 192.168.1.1:5060;branch=z9hG4bK123;rport;received=10.0.0.1").unwrap();
        assert_eq!(via.transport, "UDP");
        assert_eq!(via.branch, "z9hG4bK123");
        assert_eq!(via.received.as_deref(), Some("10.0.0.1"));
        assert_eq!(via.rport, Some(None));
    }

    #[test]
    fn parses_via_without_port() {
        let via = parse_via("SIP/2.0/TCP pc33.atlanta.com;branch=z9hG4bK776asdhds").unwrap();
        assert_eq!(via.host, "pc33.atlanta.com");
        assert_eq!(via.port, None);
    }

    #[test]
    fn parses_via_with_ipv6_literal() {
        let via = parse_via("SIP/2.0/UDP [2001:db8::1]:5060;branch=z9hG4bKabc").unwrap();
        assert_eq!(via.host, "2001:db8::1");
        assert_eq!(via.port, Some(5060));
    }

    #[test]
    fn rejects_via_without_branch() {
        assert!(parse_via("SIP/2.0/UDP pc33.atlanta.com").is_err());
    }

    #[test]
    fn parses_from_with_display_name_and_tag() {
        let na = parse_name_addr("\"Alice\" <sip:alice@example.com>;tag=1928301774", HeaderField::From).unwrap();
        assert_eq!(na.display_name.as_deref(), Some("Alice"));
        assert_eq!(na.tag(), Some("1928301774"));
    }

    #[test]
    fn parses_bare_uri_without_brackets() {
        let na = parse_name_addr("sip:bob@biloxi.com;tag=a6c85cf", HeaderField::To).unwrap();
        assert_eq!(na.display_name, None);
        assert_eq!(na.tag(), Some("a6c85cf"));
    }

    #[test]
    fn parses_cseq() {
        let cseq = parse_cseq("314159 INVITE").unwrap();
        assert_eq!(cseq.seq, 314159);
        assert_eq!(cseq.method, Method::Invite);
    }

    #[test]
    fn splits_comma_list_respecting_angle_brackets() {
        let list = split_comma_list("<sip:a@x.com>;lr, <sip:b@y.com;transport=tcp>");
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn splits_comma_list_of_option_tags() {
        let list = split_comma_list("100rel, timer, path");
        assert_eq!(list, vec!["100rel", "timer", "path"]);
    }
}
