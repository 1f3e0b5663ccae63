//! Markup fragment parser
//!
//! Parses HTML-like fragments into a [`Document`]. The supported subset is
//! what component templates use:
//!
//! - elements with quoted, unquoted or bare attributes
//! - void elements (`<input>`) and self-closing syntax (`<br/>`)
//! - text with the basic entities (`&amp;` `&lt;` `&gt;` `&quot;` `&#39;`)
//! - comments (dropped)
//!
//! Whitespace-only text between elements is dropped. Tag and attribute
//! names are lowercased.
//!
//! Parsing runs in two steps: a nom tokenizer produces open/close/text
//! tokens, then a stack-based builder checks nesting and inserts nodes.
//! Nothing is inserted unless the whole fragment is well-formed.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{cut, map, opt, recognize},
    error::{context, VerboseError, VerboseErrorKind},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    Finish, IResult,
};
use tracing::trace;

use crate::error::{MarkupError, MarkupResult};
use crate::tree::{is_void_tag, Document, Element, NodeId};

type ParseResult<'a, O> = IResult<&'a str, O, VerboseError<&'a str>>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open {
        tag: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    Close(String),
    Text(String),
    Comment,
}

// =============================================================================
// TOKENIZER
// =============================================================================

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')
}

fn name(input: &str) -> ParseResult<&str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic()),
        take_while(is_name_char),
    ))(input)
}

fn attr_name(input: &str) -> ParseResult<&str> {
    take_while1(|c: char| !c.is_whitespace() && !matches!(c, '=' | '>' | '/' | '"' | '\''))(input)
}

fn attr_value(input: &str) -> ParseResult<&str> {
    alt((
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        take_while1(|c: char| !c.is_whitespace() && !matches!(c, '>' | '"' | '\'')),
    ))(input)
}

fn attribute(input: &str) -> ParseResult<(String, String)> {
    let (input, _) = multispace0(input)?;
    let (input, name) = attr_name(input)?;
    let (input, value) = opt(preceded(
        tuple((multispace0, char('='), multispace0)),
        context("attribute value", attr_value),
    ))(input)?;
    Ok((
        input,
        (
            name.to_ascii_lowercase(),
            decode_entities(value.unwrap_or("")),
        ),
    ))
}

fn open_tag(input: &str) -> ParseResult<Token> {
    let (input, _) = char('<')(input)?;
    let (input, tag_name) = name(input)?;
    let (input, attrs) = many0(attribute)(input)?;
    let (input, _) = multispace0(input)?;
    let (input, self_closing) = cut(context(
        "end of start tag",
        alt((map(tag("/>"), |_| true), map(char('>'), |_| false))),
    ))(input)?;
    Ok((
        input,
        Token::Open {
            tag: tag_name.to_ascii_lowercase(),
            attrs,
            self_closing,
        },
    ))
}

fn close_tag(input: &str) -> ParseResult<Token> {
    let (input, tag_name) = delimited(
        tag("</"),
        context("closing tag name", name),
        preceded(multispace0, context("end of closing tag", char('>'))),
    )(input)?;
    Ok((input, Token::Close(tag_name.to_ascii_lowercase())))
}

fn comment(input: &str) -> ParseResult<Token> {
    map(
        delimited(tag("<!--"), take_until("-->"), tag("-->")),
        |_| Token::Comment,
    )(input)
}

fn text(input: &str) -> ParseResult<Token> {
    map(take_while1(|c| c != '<'), |raw: &str| {
        Token::Text(decode_entities(raw))
    })(input)
}

fn token(input: &str) -> ParseResult<Token> {
    context("markup", alt((comment, close_tag, open_tag, text)))(input)
}

fn tokenize(source: &str) -> MarkupResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut input = source;
    while !input.is_empty() {
        match token(input).finish() {
            Ok((rest, token)) => {
                tokens.push(token);
                input = rest;
            }
            Err(err) => return Err(syntax_error(source, &err)),
        }
    }
    Ok(tokens)
}

fn syntax_error(source: &str, err: &VerboseError<&str>) -> MarkupError {
    let fragment = err.errors.first().map(|(input, _)| *input).unwrap_or(source);
    let offset = source.len().saturating_sub(fragment.len());
    let consumed = &source[..offset];
    let line = consumed.matches('\n').count() + 1;
    let column = consumed
        .rsplit('\n')
        .next()
        .map(|l| l.chars().count() + 1)
        .unwrap_or(1);

    let message = err
        .errors
        .iter()
        .rev()
        .find_map(|(_, kind)| match kind {
            VerboseErrorKind::Context(ctx) => Some(format!("invalid {}", ctx)),
            _ => None,
        })
        .unwrap_or_else(|| {
            let preview: String = fragment.chars().take(20).collect();
            format!("unexpected input near \"{}\"", preview)
        });

    MarkupError::Syntax {
        line,
        column,
        message,
    }
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

// =============================================================================
// TREE BUILDER
// =============================================================================

/// Check nesting before anything is inserted
fn validate(tokens: &[Token]) -> MarkupResult<()> {
    let mut open: Vec<&str> = Vec::new();
    for token in tokens {
        match token {
            Token::Open {
                tag, self_closing, ..
            } if !*self_closing && !is_void_tag(tag) => open.push(tag),
            Token::Close(tag) if is_void_tag(tag) => {}
            Token::Close(tag) => match open.pop() {
                Some(expected) if expected == tag.as_str() => {}
                Some(expected) => {
                    return Err(MarkupError::MismatchedClose {
                        expected: expected.to_string(),
                        found: tag.clone(),
                    })
                }
                None => {
                    return Err(MarkupError::MismatchedClose {
                        expected: String::new(),
                        found: tag.clone(),
                    })
                }
            },
            _ => {}
        }
    }
    match open.pop() {
        Some(tag) => Err(MarkupError::Unclosed {
            tag: tag.to_string(),
        }),
        None => Ok(()),
    }
}

fn build_element(tag: &str, attrs: &[(String, String)]) -> Element {
    let mut element = Element::new(tag);
    for (name, value) in attrs {
        element.attrs.insert(name.clone(), value.clone());
    }
    element.value = element.attr("value").unwrap_or("").to_string();
    element.checked = element.attrs.contains_key("checked");
    element
}

impl Document {
    /// Parse a markup fragment into a new document
    pub fn parse_fragment(markup: &str) -> MarkupResult<Document> {
        let mut doc = Document::new();
        let root = doc.root();
        doc.append_markup(root, markup)?;
        Ok(doc)
    }

    /// Parse markup and append the resulting nodes to `parent`
    ///
    /// Returns the top-level nodes inserted.
    pub fn append_markup(&mut self, parent: NodeId, markup: &str) -> MarkupResult<Vec<NodeId>> {
        let tokens = tokenize(markup)?;
        validate(&tokens)?;

        let mut stack = vec![parent];
        let mut top_level = Vec::new();
        for token in tokens {
            let current = *stack.last().unwrap_or(&parent);
            match token {
                Token::Open {
                    tag,
                    attrs,
                    self_closing,
                } => {
                    let node = self.create_element(build_element(&tag, &attrs));
                    self.append_child(current, node);
                    if stack.len() == 1 {
                        top_level.push(node);
                    }
                    if !self_closing && !is_void_tag(&tag) {
                        stack.push(node);
                    }
                }
                Token::Close(tag) => {
                    if !is_void_tag(&tag) {
                        stack.pop();
                    }
                }
                Token::Text(text) => {
                    if text.trim().is_empty() {
                        continue;
                    }
                    let node = self.create_text(text);
                    self.append_child(current, node);
                    if stack.len() == 1 {
                        top_level.push(node);
                    }
                }
                Token::Comment => {}
            }
        }

        trace!(nodes = top_level.len(), "markup appended");
        Ok(top_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_serialization() {
        let source = r#"<ul data-list="todos"><template data-item><li data-text="item.title"></li></template></ul>"#;
        let doc = Document::parse_fragment(source).unwrap();
        assert_eq!(doc.html(), source);
    }

    #[test]
    fn test_void_and_self_closing() {
        let doc = Document::parse_fragment("<p>a<br>b<img src=x.png/></p>").unwrap();
        assert_eq!(doc.html(), "<p>a<br>b<img src=\"x.png/\"></p>");

        let doc = Document::parse_fragment("<div><span/></div>").unwrap();
        assert_eq!(doc.html(), "<div><span></span></div>");
    }

    #[test]
    fn test_form_properties_from_attributes() {
        let doc =
            Document::parse_fragment(r#"<input type="checkbox" checked><input value='7'>"#).unwrap();
        let inputs = doc.query_tag(doc.root(), "input");
        assert!(doc.checked(inputs[0]));
        assert_eq!(doc.value(inputs[1]), "7");
    }

    #[test]
    fn test_entities_and_whitespace() {
        let doc = Document::parse_fragment("<div>\n  <b>a &amp; b</b>\n</div><!-- note -->").unwrap();
        let b = doc.query_tag(doc.root(), "b")[0];
        assert_eq!(doc.text_content(b), "a & b");
        assert_eq!(doc.html(), "<div><b>a &amp; b</b></div>");
    }

    #[test]
    fn test_nesting_errors() {
        assert_eq!(
            Document::parse_fragment("<div><span></div>").unwrap_err(),
            MarkupError::MismatchedClose {
                expected: "span".into(),
                found: "div".into()
            }
        );
        assert_eq!(
            Document::parse_fragment("<section>").unwrap_err(),
            MarkupError::Unclosed {
                tag: "section".into()
            }
        );
    }

    #[test]
    fn test_syntax_error_position() {
        let err = Document::parse_fragment("<div>\n<p class=\"x></p></div>").unwrap_err();
        assert!(matches!(err, MarkupError::Syntax { line: 2, .. }));
    }
}
