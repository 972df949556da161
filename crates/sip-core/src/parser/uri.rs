//! URI parsing, grounded on `rvoip_sip_core::parser::uri` — a `nom`
//! combinator grammar liberal in what it accepts (RFC 3261 §7) and strict in
//! what it produces.

use nom::{
    branch::alt,
    bytes::complete::{take_till, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{opt, recognize},
    multi::many0,
    sequence::{pair, preceded, separated_pair},
    IResult,
};

use crate::error::Error;
use crate::types::param::Param;
use crate::types::uri::{Host, Scheme, Uri};

fn is_scheme_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'
}

fn is_user_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-_.!~*'()&=+$,;?/%".contains(c)
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_'
}

fn is_param_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-_.!~*'()+$,;:%".contains(c)
}

fn scheme(input: &str) -> IResult<&str, Scheme> {
    let (input, s) = recognize(pair(
        nom::character::complete::alpha1,
        take_while(is_scheme_char),
    ))(input)?;
    let (input, _) = char(':')(input)?;
    Ok((input, s.parse().unwrap_or(Scheme::Custom(s.to_string()))))
}

fn userinfo(input: &str) -> IResult<&str, (String, Option<String>)> {
    let (input, user) = take_while1(is_user_char)(input)?;
    let (input, password) = opt(preceded(char(':'), take_while(is_user_char)))(input)?;
    let (input, _) = char('@')(input)?;
    Ok((input, (user.to_string(), password.map(|s| s.to_string()))))
}

fn ipv6_literal(input: &str) -> IResult<&str, &str> {
    let (input, _) = char('[')(input)?;
    let (input, addr) = take_till(|c| c == ']')(input)?;
    let (input, _) = char(']')(input)?;
    Ok((input, addr))
}

fn host(input: &str) -> IResult<&str, Host> {
    alt((
        nom::combinator::map(ipv6_literal, |s| {
            s.parse()
                .map(Host::Ip)
                .unwrap_or_else(|_| Host::Domain(s.to_string()))
        }),
        nom::combinator::map(take_while1(is_host_char), |s: &str| {
            s.parse::<std::net::IpAddr>()
                .map(Host::Ip)
                .unwrap_or_else(|_| Host::Domain(s.to_string()))
        }),
    ))(input)
}

fn port(input: &str) -> IResult<&str, u16> {
    preceded(
        char(':'),
        nom::combinator::map_res(digit1, |s: &str| s.parse::<u16>()),
    )(input)
}

fn param(input: &str) -> IResult<&str, Param> {
    let (input, _) = char(';')(input)?;
    let (input, name) = take_while1(is_param_char)(input)?;
    let (input, value) = opt(preceded(char('='), take_while(is_param_char)))(input)?;
    Ok((
        input,
        Param::new(name.to_string(), value.map(|s| s.to_string())),
    ))
}

fn header_param(input: &str) -> IResult<&str, (String, String)> {
    separated_pair(
        take_while1(is_param_char),
        char('='),
        take_while(is_param_char),
    )(input)
    .map(|(rest, (k, v))| (rest, (k.to_string(), v.to_string())))
}

fn headers(input: &str) -> IResult<&str, Vec<(String, String)>> {
    let (input, _) = char('?')(input)?;
    nom::multi::separated_list0(char('&'), header_param)(input)
}

/// Parse a `Uri` from the start of `input`, returning the unconsumed tail.
pub fn parse_uri(input: &str) -> IResult<&str, Uri> {
    let (input, scheme) = scheme(input)?;
    let (input, user_info) = opt(userinfo)(input)?;
    let (input, host) = host(input)?;
    let (input, port) = opt(port)(input)?;
    let (input, params) = many0(param)(input)?;
    let (input, hdrs) = opt(headers)(input)?;

    let (user, password) = match user_info {
        Some((u, p)) => (Some(u), p),
        None => (None, None),
    };

    Ok((
        input,
        Uri {
            scheme,
            user,
            password,
            host,
            port,
            params,
            headers: hdrs.unwrap_or_default(),
        },
    ))
}

/// Parse a `Uri` that must consume the entire input (used by `Uri::from_str`
/// and by header parsers embedding a `<...>` or bare URI).
pub fn parse_uri_complete(input: &str) -> Result<Uri, Error> {
    let input = input.trim();
    match nom::combinator::all_consuming(parse_uri)(input) {
        Ok((_, uri)) => Ok(uri),
        Err(_) => Err(Error::InvalidUri(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_sip_uri() {
        let uri = parse_uri_complete("sip:alice@example.com:5060;transport=udp").unwrap();
        assert_eq!(uri.scheme, Scheme::Sip);
        assert_eq!(uri.user.as_deref(), Some("alice"));
        assert_eq!(uri.port, Some(5060));
        assert_eq!(uri.transport(), Some("udp"));
    }

    #[test]
    fn parses_uri_with_lr_param() {
        let uri = parse_uri_complete("sip:proxy.example.com;lr").unwrap();
        assert!(uri.is_loose_router());
    }

    #[test]
    fn parses_ipv6_host() {
        let uri = parse_uri_complete("sip:[2001:db8::1]:5060").unwrap();
        assert!(matches!(uri.host, Host::Ip(std::net::IpAddr::V6(_))));
    }
}
