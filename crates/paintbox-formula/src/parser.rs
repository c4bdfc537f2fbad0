//! Formula parser
//!
//! A recursive descent parser for Excel formulas with proper operator precedence.
//! Named ranges are looked up through a [`NameResolver`] while parsing, so the
//! resulting AST only contains literals, references, operators and calls.

use crate::ast::{BinaryOperator, CellReference, FormulaExpr, RangeReference, UnaryOperator};
use crate::error::{FormulaError, FormulaResult};
use paintbox_core::{
    CellAddress, CellError, CellRange, CellStore, CellValue, NameScope, NameTarget, SheetId,
};

/// Locale-dependent parser settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserOptions {
    /// Separator between function arguments: `,` (default) or `;`
    pub list_separator: char,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            list_separator: ',',
        }
    }
}

/// A named range as seen from the formula being parsed
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedName {
    pub target: NameTarget,
    /// Whether a sheet-local definition was used
    pub local: bool,
}

/// Looks up defined names while parsing
pub trait NameResolver {
    fn resolve_name(&self, name: &str) -> Option<ResolvedName>;
}

/// Resolves names visible from one sheet of a [`CellStore`]
pub struct SheetNames<'a> {
    store: &'a CellStore,
    sheet: SheetId,
}

impl<'a> SheetNames<'a> {
    pub fn new(store: &'a CellStore, sheet: SheetId) -> Self {
        Self { store, sheet }
    }
}

impl NameResolver for SheetNames<'_> {
    fn resolve_name(&self, name: &str) -> Option<ResolvedName> {
        let named = self.store.names().get(name, self.sheet)?;
        let mut target = named.target.clone();

        // Unqualified targets of a sheet-local name point at the defining sheet
        if let (NameScope::Sheet(owner), NameTarget::Reference(reference)) =
            (named.scope, &mut target)
        {
            if reference.sheet.is_none() {
                reference.sheet = self.store.sheet_name(owner).map(str::to_string);
            }
        }

        Some(ResolvedName {
            target,
            local: matches!(named.scope, NameScope::Sheet(_)),
        })
    }
}

/// Everything the parser needs besides the text itself
#[derive(Clone, Copy, Default)]
pub struct ParseContext<'a> {
    pub options: ParserOptions,
    pub names: Option<&'a dyn NameResolver>,
}

impl<'a> ParseContext<'a> {
    pub fn new(options: ParserOptions, names: &'a dyn NameResolver) -> Self {
        Self {
            options,
            names: Some(names),
        }
    }
}

/// A parsed formula plus the names its parse depended on
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFormula {
    pub expr: FormulaExpr,
    /// Lowercased names looked up during parsing, resolved or not
    pub names: Vec<String>,
    /// Whether any sheet-local definition was used
    pub uses_local_names: bool,
}

/// What a user typed into a cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellInput {
    Value(CellValue),
    Formula(FormulaExpr),
}

/// Parse a formula string into an AST, without named ranges
///
/// Any identifier that is not a function call becomes `#NAME?`.
///
/// # Example
/// ```rust
/// use paintbox_formula::parse_formula;
///
/// let ast = parse_formula("=1+2").unwrap();
/// let ast = parse_formula("=SUM(A1:A10)").unwrap();
/// let ast = parse_formula("=IF(A1>0,\"Yes\",\"No\")").unwrap();
/// ```
pub fn parse_formula(formula: &str) -> FormulaResult<FormulaExpr> {
    parse_formula_with(formula, &ParseContext::default()).map(|parsed| parsed.expr)
}

/// Parse a formula string, resolving names through `ctx`
pub fn parse_formula_with(formula: &str, ctx: &ParseContext<'_>) -> FormulaResult<ParsedFormula> {
    let leading = formula.len() - formula.trim_start().len();
    let trimmed = formula.trim();

    // Formula must start with '='
    let body = trimmed
        .strip_prefix('=')
        .ok_or_else(|| FormulaError::parse("Formula must start with '='", leading))?;

    let mut parser = FormulaParser::new(body, leading + 1, ctx)?;
    if parser.current_token() == &Token::Eof {
        return Err(FormulaError::parse("Empty formula", parser.position()));
    }
    let expr = parser.parse_expression()?;

    // Make sure we consumed all input
    if parser.current_token() != &Token::Eof {
        return Err(FormulaError::parse(
            format!("Unexpected {} after expression", parser.current_token().describe()),
            parser.token_position(),
        ));
    }

    Ok(ParsedFormula {
        expr,
        names: parser.names_used,
        uses_local_names: parser.uses_local_names,
    })
}

/// Interpret raw cell input
///
/// Text starting with `=` is a formula. Anything else is a literal: numbers,
/// `TRUE`/`FALSE` in any case, error codes, `"quoted"` text, or plain text.
pub fn parse_cell_input(text: &str, ctx: &ParseContext<'_>) -> FormulaResult<CellInput> {
    if text.trim_start().starts_with('=') {
        return parse_formula_with(text, ctx).map(|parsed| CellInput::Formula(parsed.expr));
    }
    Ok(CellInput::Value(parse_literal(text)))
}

/// Interpret non-formula text as a cell value
pub fn parse_literal(text: &str) -> CellValue {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return if text.is_empty() {
            CellValue::Empty
        } else {
            CellValue::string(text)
        };
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        if n.is_finite() {
            return CellValue::Number(n);
        }
    }
    if trimmed.eq_ignore_ascii_case("TRUE") {
        return CellValue::Boolean(true);
    }
    if trimmed.eq_ignore_ascii_case("FALSE") {
        return CellValue::Boolean(false);
    }
    if let Some(err) = CellError::parse(trimmed) {
        return CellValue::Error(err);
    }
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        let inner = &trimmed[1..trimmed.len() - 1];
        return CellValue::string(inner.replace("\"\"", "\""));
    }
    CellValue::string(text)
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Literals
    Number(f64),
    String(String),
    Boolean(bool),
    Error(CellError),

    // Identifiers and references
    Identifier(String), // Function name or named range
    CellRef(String),    // Cell reference like A1, $A$1
    SheetRef(String),   // Sheet reference like Sheet1! or 'Sheet 1'!

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    Ampersand,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Colon,
    Comma,
    Semicolon,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,

    // End of input
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::String(s) => format!("string \"{}\"", s),
            Token::Boolean(b) => format!("boolean {}", b),
            Token::Error(e) => format!("error {}", e),
            Token::Identifier(s) => format!("name '{}'", s),
            Token::CellRef(s) => format!("reference '{}'", s),
            Token::SheetRef(s) => format!("sheet '{}'", s),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Caret => "'^'".into(),
            Token::Percent => "'%'".into(),
            Token::Ampersand => "'&'".into(),
            Token::Equal => "'='".into(),
            Token::NotEqual => "'<>'".into(),
            Token::LessThan => "'<'".into(),
            Token::LessEqual => "'<='".into(),
            Token::GreaterThan => "'>'".into(),
            Token::GreaterEqual => "'>='".into(),
            Token::Colon => "':'".into(),
            Token::Comma => "','".into(),
            Token::Semicolon => "';'".into(),
            Token::LeftParen => "'('".into(),
            Token::RightParen => "')'".into(),
            Token::LeftBrace => "'{'".into(),
            Token::RightBrace => "'}'".into(),
            Token::Eof => "end of formula".into(),
        }
    }
}

const WHOLE_LINE_UNSUPPORTED: &str = "Whole-column and whole-row references are not supported";

/// A bare column (`A`, `$XFD`) or row number (`5`) that could open `A:A` or `5:5`
fn is_line_bound(token: &Token) -> bool {
    match token {
        Token::Identifier(text) => {
            let letters = text.strip_prefix('$').unwrap_or(text);
            letters.len() <= 3 && CellAddress::letters_to_column(letters).is_ok()
        }
        Token::Number(n) => *n >= 1.0 && n.fract() == 0.0,
        _ => false,
    }
}

/// Formula parser
struct FormulaParser<'a, 'c> {
    input: &'a str,
    /// Offset of `input` within the original text, for error positions
    base: usize,
    pos: usize,
    token_start: usize,
    current_token: Token,
    ctx: &'c ParseContext<'c>,
    names_used: Vec<String>,
    uses_local_names: bool,
}

impl<'a, 'c> FormulaParser<'a, 'c> {
    fn new(input: &'a str, base: usize, ctx: &'c ParseContext<'c>) -> FormulaResult<Self> {
        let mut parser = Self {
            input,
            base,
            pos: 0,
            token_start: 0,
            current_token: Token::Eof,
            ctx,
            names_used: Vec::new(),
            uses_local_names: false,
        };
        parser.advance_token()?;
        Ok(parser)
    }

    fn position(&self) -> usize {
        self.base + self.pos
    }

    fn token_position(&self) -> usize {
        self.base + self.token_start
    }

    fn error(&self, message: impl Into<String>) -> FormulaError {
        FormulaError::parse(message, self.token_position())
    }

    // === Token scanning ===

    fn advance_token(&mut self) -> FormulaResult<()> {
        self.skip_whitespace();
        self.token_start = self.pos;
        self.current_token = self.scan_token()?;
        Ok(())
    }

    fn scan_token(&mut self) -> FormulaResult<Token> {
        let c = match self.peek_char() {
            Some(c) => c,
            None => return Ok(Token::Eof),
        };

        // Single-character tokens
        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '^' => Some(Token::Caret),
            '%' => Some(Token::Percent),
            '&' => Some(Token::Ampersand),
            ':' => Some(Token::Colon),
            ',' => Some(Token::Comma),
            ';' => Some(Token::Semicolon),
            '(' => Some(Token::LeftParen),
            ')' => Some(Token::RightParen),
            '{' => Some(Token::LeftBrace),
            '}' => Some(Token::RightBrace),
            '=' => Some(Token::Equal),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return Ok(token);
        }

        // Two-character operators
        if c == '<' {
            self.advance();
            if self.peek_char() == Some('=') {
                self.advance();
                return Ok(Token::LessEqual);
            } else if self.peek_char() == Some('>') {
                self.advance();
                return Ok(Token::NotEqual);
            }
            return Ok(Token::LessThan);
        }

        if c == '>' {
            self.advance();
            if self.peek_char() == Some('=') {
                self.advance();
                return Ok(Token::GreaterEqual);
            }
            return Ok(Token::GreaterThan);
        }

        // String literal
        if c == '"' {
            return self.scan_string();
        }

        // Quoted sheet name
        if c == '\'' {
            return self.scan_quoted_sheet();
        }

        // Number
        if c.is_ascii_digit()
            || (c == '.' && self.peek_char_at(1).map_or(false, |c| c.is_ascii_digit()))
        {
            return self.scan_number();
        }

        // Identifier, cell reference, or boolean/error
        if c.is_alphabetic() || c == '_' || c == '\\' || c == '$' || c == '#' {
            return self.scan_identifier_or_ref();
        }

        Err(FormulaError::parse(
            format!("Unexpected character '{}'", c),
            self.position(),
        ))
    }

    fn scan_string(&mut self) -> FormulaResult<Token> {
        self.advance(); // Skip opening quote

        let mut s = String::new();
        loop {
            match self.peek_char() {
                Some('"') => {
                    // Check for escaped quote ("")
                    if self.peek_char_at(1) == Some('"') {
                        s.push('"');
                        self.advance();
                        self.advance();
                    } else {
                        self.advance();
                        return Ok(Token::String(s));
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
                None => return Err(self.error("Unterminated string literal")),
            }
        }
    }

    fn scan_quoted_sheet(&mut self) -> FormulaResult<Token> {
        self.advance(); // Skip opening apostrophe

        let mut name = String::new();
        loop {
            match self.peek_char() {
                Some('\'') => {
                    if self.peek_char_at(1) == Some('\'') {
                        name.push('\'');
                        self.advance();
                        self.advance();
                    } else {
                        self.advance();
                        break;
                    }
                }
                Some(c) => {
                    name.push(c);
                    self.advance();
                }
                None => return Err(self.error("Unterminated sheet name")),
            }
        }

        if name.is_empty() || self.peek_char() != Some('!') {
            return Err(self.error("Expected '!' after quoted sheet name"));
        }
        self.advance();
        Ok(Token::SheetRef(name))
    }

    fn scan_number(&mut self) -> FormulaResult<Token> {
        let start = self.pos;

        // Integer part
        while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }

        // Decimal part
        if self.peek_char() == Some('.') {
            self.advance();
            while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        // Exponent part
        if self.peek_char().map_or(false, |c| c == 'e' || c == 'E') {
            self.advance();
            if self.peek_char().map_or(false, |c| c == '+' || c == '-') {
                self.advance();
            }
            while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let num_str = &self.input[start..self.pos];
        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(format!("Invalid number '{}'", num_str)))
    }

    fn scan_identifier_or_ref(&mut self) -> FormulaResult<Token> {
        // Check for error values first (#VALUE!, #REF!, etc.)
        if self.peek_char() == Some('#') {
            let start = self.pos;
            self.advance();
            while self.peek_char().map_or(false, |c| {
                c.is_ascii_alphanumeric() || c == '!' || c == '/' || c == '?'
            }) {
                self.advance();
            }
            let error_str = &self.input[start..self.pos];
            return CellError::parse(error_str)
                .map(Token::Error)
                .ok_or_else(|| self.error(format!("Unknown error literal '{}'", error_str)));
        }

        let start = self.pos;

        // Scan identifier/reference
        while self.peek_char().map_or(false, |c| {
            c.is_alphanumeric() || c == '_' || c == '$' || c == '.' || c == '\\'
        }) {
            self.advance();
        }

        let text = &self.input[start..self.pos];

        // Check for sheet reference (ends with !)
        if self.peek_char() == Some('!') {
            self.advance();
            return Ok(Token::SheetRef(text.to_string()));
        }

        // Check for boolean literals (but not if followed by '(' - then it's a function call)
        let followed_by_paren = self.peek_non_whitespace() == Some('(');
        if text.eq_ignore_ascii_case("TRUE") && !followed_by_paren {
            return Ok(Token::Boolean(true));
        }
        if text.eq_ignore_ascii_case("FALSE") && !followed_by_paren {
            return Ok(Token::Boolean(false));
        }

        // Check if it looks like a cell reference (letter(s) followed by number(s))
        // BUT if followed by '(' it's a function call (e.g., LOG10(100) is function, not cell ref)
        if !followed_by_paren && Self::is_cell_reference(text) {
            return Ok(Token::CellRef(text.to_string()));
        }

        // Otherwise it's an identifier (function name or named range)
        Ok(Token::Identifier(text.to_string()))
    }

    fn is_cell_reference(text: &str) -> bool {
        // Pattern [$]letters[$]digits within the sheet bounds; anything
        // else (RATE2024, Q1.Total) is left for the name resolver
        let bytes = text.as_bytes();
        let mut i = usize::from(bytes.first() == Some(&b'$'));

        let letter_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        if i == letter_start {
            return false;
        }
        if bytes.get(i) == Some(&b'$') {
            i += 1;
        }
        let digit_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i > digit_start && i == bytes.len() && CellAddress::parse(text).is_ok()
    }

    // === Helper methods ===

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(offset)
    }

    fn peek_non_whitespace(&self) -> Option<char> {
        self.input[self.pos..].chars().find(|c| !c.is_whitespace())
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().map_or(false, |c| c.is_whitespace()) {
            self.advance();
        }
    }

    fn current_token(&self) -> &Token {
        &self.current_token
    }

    fn consume(&mut self) -> FormulaResult<Token> {
        let token = std::mem::replace(&mut self.current_token, Token::Eof);
        self.advance_token()?;
        Ok(token)
    }

    fn expect(&mut self, expected: &Token) -> FormulaResult<()> {
        if self.current_token() == expected {
            self.consume()?;
            Ok(())
        } else {
            Err(self.error(format!(
                "Expected {}, got {}",
                expected.describe(),
                self.current_token().describe()
            )))
        }
    }

    fn argument_separator(&self) -> Token {
        if self.ctx.options.list_separator == ';' {
            Token::Semicolon
        } else {
            Token::Comma
        }
    }

    // === Expression parsing with precedence ===
    // Precedence (lowest to highest):
    // 1. Comparison: =, <>, <, <=, >, >=
    // 2. Concatenation: &
    // 3. Addition/Subtraction: +, -
    // 4. Multiplication/Division: *, /
    // 5. Exponentiation: ^
    // 6. Postfix percent: %
    // 7. Prefix sign: -, +
    // 8. Range: :
    // 9. Primary: literals, references, function calls, parentheses

    fn parse_expression(&mut self) -> FormulaResult<FormulaExpr> {
        self.parse_comparison()
    }

    fn binary(op: BinaryOperator, left: FormulaExpr, right: FormulaExpr) -> FormulaExpr {
        FormulaExpr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn parse_comparison(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_concatenation()?;

        loop {
            let op = match self.current_token() {
                Token::Equal => BinaryOperator::Equal,
                Token::NotEqual => BinaryOperator::NotEqual,
                Token::LessThan => BinaryOperator::LessThan,
                Token::LessEqual => BinaryOperator::LessEqual,
                Token::GreaterThan => BinaryOperator::GreaterThan,
                Token::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };

            self.consume()?;
            let right = self.parse_concatenation()?;
            left = Self::binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_concatenation(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_additive()?;

        while matches!(self.current_token(), Token::Ampersand) {
            self.consume()?;
            let right = self.parse_additive()?;
            left = Self::binary(BinaryOperator::Concat, left, right);
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current_token() {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => break,
            };

            self.consume()?;
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_exponent()?;

        loop {
            let op = match self.current_token() {
                Token::Star => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                _ => break,
            };

            self.consume()?;
            let right = self.parse_exponent()?;
            left = Self::binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_exponent(&mut self) -> FormulaResult<FormulaExpr> {
        let left = self.parse_percent()?;

        if matches!(self.current_token(), Token::Caret) {
            self.consume()?;
            let right = self.parse_exponent()?; // Right associative
            return Ok(Self::binary(BinaryOperator::Power, left, right));
        }

        Ok(left)
    }

    fn parse_percent(&mut self) -> FormulaResult<FormulaExpr> {
        let mut expr = self.parse_unary()?;

        while matches!(self.current_token(), Token::Percent) {
            self.consume()?;
            expr = FormulaExpr::UnaryOp {
                op: UnaryOperator::Percent,
                operand: Box::new(expr),
            };
        }

        Ok(expr)
    }

    fn parse_unary(&mut self) -> FormulaResult<FormulaExpr> {
        // Prefix unary minus
        if matches!(self.current_token(), Token::Minus) {
            self.consume()?;
            let operand = self.parse_unary()?;
            return Ok(FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                operand: Box::new(operand),
            });
        }

        // Prefix plus (no-op)
        if matches!(self.current_token(), Token::Plus) {
            self.consume()?;
            return self.parse_unary();
        }

        self.parse_range()
    }

    fn parse_range(&mut self) -> FormulaResult<FormulaExpr> {
        let start = self.current_token().clone();
        let left = self.parse_primary()?;

        // Check for range operator (:)
        if !matches!(self.current_token(), Token::Colon) {
            return Ok(left);
        }
        self.consume()?;
        let position = self.token_position();
        if is_line_bound(&start) && is_line_bound(self.current_token()) {
            return Err(FormulaError::parse(WHOLE_LINE_UNSUPPORTED, position));
        }
        let right = self.parse_primary()?;

        // Both ends must be single cells (named cells are fine)
        match (left, right) {
            (FormulaExpr::CellRef(start_ref), FormulaExpr::CellRef(end_ref)) => {
                let same_sheet = match (&start_ref.sheet, &end_ref.sheet) {
                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                    _ => true,
                };
                if !same_sheet {
                    return Err(FormulaError::parse(
                        "Range references must be on the same sheet",
                        position,
                    ));
                }

                let range = CellRange::new(start_ref.address, end_ref.address);
                Ok(FormulaExpr::RangeRef(RangeReference {
                    sheet: start_ref.sheet.or(end_ref.sheet),
                    range,
                }))
            }
            _ => Err(FormulaError::parse(
                "Range operator needs a cell reference on both sides",
                position,
            )),
        }
    }

    fn parse_primary(&mut self) -> FormulaResult<FormulaExpr> {
        match self.current_token().clone() {
            Token::Number(n) => {
                self.consume()?;
                Ok(FormulaExpr::Number(n))
            }

            Token::String(s) => {
                self.consume()?;
                Ok(FormulaExpr::String(s))
            }

            Token::Boolean(b) => {
                self.consume()?;
                Ok(FormulaExpr::Boolean(b))
            }

            Token::Error(e) => {
                self.consume()?;
                Ok(FormulaExpr::Error(e))
            }

            Token::LeftParen => {
                self.consume()?;
                let expr = self.parse_expression()?;
                self.expect(&Token::RightParen)?;
                Ok(expr)
            }

            Token::LeftBrace => self.parse_array(),

            Token::SheetRef(sheet) => {
                self.consume()?;
                self.parse_sheet_reference(sheet)
            }

            Token::CellRef(ref_str) => {
                self.consume()?;
                self.parse_cell_reference(None, &ref_str)
            }

            Token::Identifier(name) => {
                self.consume()?;
                // Check if it's a function call
                if matches!(self.current_token(), Token::LeftParen) {
                    self.parse_function_call(name)
                } else {
                    Ok(self.resolve_name(&name))
                }
            }

            other => Err(self.error(format!("Unexpected {}", other.describe()))),
        }
    }

    fn resolve_name(&mut self, name: &str) -> FormulaExpr {
        let lower = name.to_lowercase();
        if !self.names_used.contains(&lower) {
            self.names_used.push(lower);
        }

        let resolved = self.ctx.names.and_then(|names| names.resolve_name(name));
        let Some(resolved) = resolved else {
            log::debug!("unknown name '{}' parsed as #NAME?", name);
            return FormulaExpr::Error(CellError::Name);
        };
        self.uses_local_names |= resolved.local;

        match resolved.target {
            NameTarget::Reference(reference) => {
                if reference.is_single_cell() {
                    FormulaExpr::CellRef(CellReference {
                        sheet: reference.sheet,
                        address: reference.range.start,
                    })
                } else {
                    FormulaExpr::RangeRef(RangeReference {
                        sheet: reference.sheet,
                        range: reference.range,
                    })
                }
            }
            NameTarget::Constant(value) => match value {
                CellValue::Number(n) => FormulaExpr::Number(n),
                CellValue::Boolean(b) => FormulaExpr::Boolean(b),
                CellValue::String(s) => FormulaExpr::String(s.as_str().to_string()),
                CellValue::Error(e) => FormulaExpr::Error(e),
                CellValue::Empty => FormulaExpr::String(String::new()),
            },
            NameTarget::Unsupported(_) => FormulaExpr::Error(CellError::Name),
        }
    }

    fn parse_array(&mut self) -> FormulaResult<FormulaExpr> {
        self.expect(&Token::LeftBrace)?;

        let mut rows = Vec::new();
        let mut current_row = Vec::new();

        // Parse first element
        if !matches!(self.current_token(), Token::RightBrace) {
            current_row.push(self.parse_array_element()?);

            loop {
                match self.current_token() {
                    Token::Comma => {
                        self.consume()?;
                        current_row.push(self.parse_array_element()?);
                    }
                    Token::Semicolon => {
                        self.consume()?;
                        rows.push(std::mem::take(&mut current_row));
                        current_row.push(self.parse_array_element()?);
                    }
                    Token::RightBrace => break,
                    _ => return Err(self.error("Expected ',' ';' or '}' in array")),
                }
            }
        }

        if !current_row.is_empty() {
            rows.push(current_row);
        }

        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != width) {
            return Err(self.error("Array rows must all have the same length"));
        }

        self.expect(&Token::RightBrace)?;
        Ok(FormulaExpr::Array(rows))
    }

    /// Array elements are constants, optionally signed
    fn parse_array_element(&mut self) -> FormulaResult<FormulaExpr> {
        match self.current_token().clone() {
            Token::Minus => {
                self.consume()?;
                match self.consume()? {
                    Token::Number(n) => Ok(FormulaExpr::Number(-n)),
                    other => Err(self.error(format!("Expected number after '-', got {}", other.describe()))),
                }
            }
            Token::Plus => {
                self.consume()?;
                match self.consume()? {
                    Token::Number(n) => Ok(FormulaExpr::Number(n)),
                    other => Err(self.error(format!("Expected number after '+', got {}", other.describe()))),
                }
            }
            Token::Number(n) => {
                self.consume()?;
                Ok(FormulaExpr::Number(n))
            }
            Token::String(s) => {
                self.consume()?;
                Ok(FormulaExpr::String(s))
            }
            Token::Boolean(b) => {
                self.consume()?;
                Ok(FormulaExpr::Boolean(b))
            }
            Token::Error(e) => {
                self.consume()?;
                Ok(FormulaExpr::Error(e))
            }
            other => Err(self.error(format!("Array elements must be constants, got {}", other.describe()))),
        }
    }

    fn parse_function_call(&mut self, name: String) -> FormulaResult<FormulaExpr> {
        self.expect(&Token::LeftParen)?;

        let separator = self.argument_separator();
        let mut args = Vec::new();

        // Parse arguments
        if !matches!(self.current_token(), Token::RightParen) {
            args.push(self.parse_argument(&separator)?);

            while self.current_token() == &separator {
                self.consume()?;
                args.push(self.parse_argument(&separator)?);
            }
        }

        self.expect(&Token::RightParen)?;

        // Newer functions are stored with a compatibility prefix
        let upper = name.to_uppercase();
        let name = upper
            .strip_prefix("_XLFN.")
            .map(str::to_string)
            .unwrap_or(upper);

        Ok(FormulaExpr::Function { name, args })
    }

    /// One function argument; a separator or `)` in its place leaves it blank
    fn parse_argument(&mut self, separator: &Token) -> FormulaResult<FormulaExpr> {
        let current = self.current_token();
        if current == separator || matches!(current, Token::RightParen) {
            return Ok(FormulaExpr::Missing);
        }
        self.parse_expression()
    }

    fn parse_sheet_reference(&mut self, sheet: String) -> FormulaResult<FormulaExpr> {
        // After Sheet1!, we expect a cell reference
        match self.current_token().clone() {
            Token::CellRef(ref_str) => {
                self.consume()?;
                self.parse_cell_reference(Some(sheet), &ref_str)
            }
            ref other if is_line_bound(other) => Err(self.error(WHOLE_LINE_UNSUPPORTED)),
            other => Err(self.error(format!(
                "Expected cell reference after sheet name, got {}",
                other.describe()
            ))),
        }
    }

    fn parse_cell_reference(
        &mut self,
        sheet: Option<String>,
        ref_str: &str,
    ) -> FormulaResult<FormulaExpr> {
        let address = CellAddress::parse(ref_str)
            .map_err(|e| self.error(format!("Invalid cell reference '{}': {}", ref_str, e)))?;

        Ok(FormulaExpr::CellRef(CellReference { sheet, address }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paintbox_core::{NamedRange, QualifiedRange};
    use pretty_assertions::assert_eq;

    struct FixedNames(Vec<(&'static str, NameTarget, bool)>);

    impl NameResolver for FixedNames {
        fn resolve_name(&self, name: &str) -> Option<ResolvedName> {
            self.0
                .iter()
                .find(|(n, _, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, target, local)| ResolvedName {
                    target: target.clone(),
                    local: *local,
                })
        }
    }

    #[test]
    fn test_parse_number() {
        let ast = parse_formula("=42").unwrap();
        assert_eq!(ast, FormulaExpr::Number(42.0));

        let ast = parse_formula("=3.14").unwrap();
        assert_eq!(ast, FormulaExpr::Number(3.14));

        let ast = parse_formula("=1e10").unwrap();
        assert_eq!(ast, FormulaExpr::Number(1e10));

        let ast = parse_formula("=.5").unwrap();
        assert_eq!(ast, FormulaExpr::Number(0.5));
    }

    #[test]
    fn test_parse_string() {
        let ast = parse_formula("=\"Hello\"").unwrap();
        assert_eq!(ast, FormulaExpr::String("Hello".into()));

        let ast = parse_formula("=\"Hello \"\"World\"\"\"").unwrap();
        assert_eq!(ast, FormulaExpr::String("Hello \"World\"".into()));
    }

    #[test]
    fn test_parse_boolean() {
        let ast = parse_formula("=TRUE").unwrap();
        assert_eq!(ast, FormulaExpr::Boolean(true));

        let ast = parse_formula("=false").unwrap();
        assert_eq!(ast, FormulaExpr::Boolean(false));

        let ast = parse_formula("=TRUE()").unwrap();
        assert!(matches!(ast, FormulaExpr::Function { .. }));
    }

    #[test]
    fn test_parse_arithmetic() {
        let ast = parse_formula("=1+2*3").unwrap();
        // Should parse as 1+(2*3) due to precedence
        if let FormulaExpr::BinaryOp { op, left, right } = ast {
            assert_eq!(op, BinaryOperator::Add);
            assert_eq!(*left, FormulaExpr::Number(1.0));
            assert!(matches!(
                *right,
                FormulaExpr::BinaryOp {
                    op: BinaryOperator::Multiply,
                    ..
                }
            ));
        } else {
            panic!("Expected BinaryOp");
        }
    }

    #[test]
    fn test_power_is_right_associative() {
        let ast = parse_formula("=2^3^2").unwrap();
        assert_eq!(
            ast,
            FormulaExpr::BinaryOp {
                op: BinaryOperator::Power,
                left: Box::new(FormulaExpr::Number(2.0)),
                right: Box::new(FormulaExpr::BinaryOp {
                    op: BinaryOperator::Power,
                    left: Box::new(FormulaExpr::Number(3.0)),
                    right: Box::new(FormulaExpr::Number(2.0)),
                }),
            }
        );
    }

    #[test]
    fn test_negation_binds_tighter_than_power() {
        // Excel evaluates =-2^2 as (-2)^2
        let ast = parse_formula("=-2^2").unwrap();
        if let FormulaExpr::BinaryOp { op, left, .. } = ast {
            assert_eq!(op, BinaryOperator::Power);
            assert!(matches!(
                *left,
                FormulaExpr::UnaryOp {
                    op: UnaryOperator::Negate,
                    ..
                }
            ));
        } else {
            panic!("Expected BinaryOp");
        }
    }

    #[test]
    fn test_parse_comparison() {
        let ast = parse_formula("=A1<>B1").unwrap();
        assert!(matches!(
            ast,
            FormulaExpr::BinaryOp {
                op: BinaryOperator::NotEqual,
                ..
            }
        ));

        // Concatenation binds tighter than comparison
        let ast = parse_formula("=A1&\"x\"=\"yx\"").unwrap();
        assert!(matches!(
            ast,
            FormulaExpr::BinaryOp {
                op: BinaryOperator::Equal,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_unary() {
        let ast = parse_formula("=50%").unwrap();
        assert_eq!(
            ast,
            FormulaExpr::UnaryOp {
                op: UnaryOperator::Percent,
                operand: Box::new(FormulaExpr::Number(50.0)),
            }
        );

        let ast = parse_formula("=+5").unwrap();
        assert_eq!(ast, FormulaExpr::Number(5.0));
    }

    #[test]
    fn test_parse_cell_reference() {
        let ast = parse_formula("=A1").unwrap();
        assert_eq!(
            ast,
            FormulaExpr::CellRef(CellReference {
                sheet: None,
                address: CellAddress::new(0, 0),
            })
        );

        let ast = parse_formula("=$B$2").unwrap();
        assert_eq!(
            ast,
            FormulaExpr::CellRef(CellReference {
                sheet: None,
                address: CellAddress::absolute(1, 1),
            })
        );

        let ast = parse_formula("=B$2").unwrap();
        if let FormulaExpr::CellRef(cell_ref) = ast {
            assert!(cell_ref.address.row_absolute);
            assert!(!cell_ref.address.col_absolute);
        } else {
            panic!("Expected CellRef");
        }
    }

    #[test]
    fn test_parse_sheet_references() {
        let ast = parse_formula("=Sheet1!A1").unwrap();
        if let FormulaExpr::CellRef(cell_ref) = ast {
            assert_eq!(cell_ref.sheet.as_deref(), Some("Sheet1"));
        } else {
            panic!("Expected CellRef");
        }

        let ast = parse_formula("='Labor Rates'!$B$2:$C$9").unwrap();
        if let FormulaExpr::RangeRef(range_ref) = ast {
            assert_eq!(range_ref.sheet.as_deref(), Some("Labor Rates"));
            assert_eq!(range_ref.range.row_count(), 8);
            assert_eq!(range_ref.range.col_count(), 2);
        } else {
            panic!("Expected RangeRef");
        }

        let ast = parse_formula("='O''Brien'!A1").unwrap();
        if let FormulaExpr::CellRef(cell_ref) = ast {
            assert_eq!(cell_ref.sheet.as_deref(), Some("O'Brien"));
        } else {
            panic!("Expected CellRef");
        }

        let ast = parse_formula("=Data!A1:Data!B2").unwrap();
        assert!(matches!(ast, FormulaExpr::RangeRef(_)));

        assert!(parse_formula("=One!A1:Two!B2").is_err());
    }

    #[test]
    fn test_parse_range_reference() {
        let ast = parse_formula("=A1:B10").unwrap();
        if let FormulaExpr::RangeRef(range_ref) = ast {
            assert_eq!(range_ref.range.start.row, 0);
            assert_eq!(range_ref.range.start.col, 0);
            assert_eq!(range_ref.range.end.row, 9);
            assert_eq!(range_ref.range.end.col, 1);
        } else {
            panic!("Expected RangeRef");
        }
    }

    #[test]
    fn test_parse_function() {
        let ast = parse_formula("=sum(1,2,3)").unwrap();
        if let FormulaExpr::Function { name, args } = ast {
            assert_eq!(name, "SUM");
            assert_eq!(args.len(), 3);
        } else {
            panic!("Expected Function");
        }

        let ast = parse_formula("=_xlfn.IFNA(A1,0)").unwrap();
        if let FormulaExpr::Function { name, .. } = ast {
            assert_eq!(name, "IFNA");
        } else {
            panic!("Expected Function");
        }

        let ast = parse_formula("=LOG10(100)").unwrap();
        assert!(matches!(ast, FormulaExpr::Function { .. }));
    }

    #[test]
    fn test_semicolon_separator() {
        let ctx = ParseContext {
            options: ParserOptions {
                list_separator: ';',
            },
            names: None,
        };
        let parsed = parse_formula_with("=IF(A1>0;\"Yes\";\"No\")", &ctx).unwrap();
        if let FormulaExpr::Function { name, args } = parsed.expr {
            assert_eq!(name, "IF");
            assert_eq!(args.len(), 3);
        } else {
            panic!("Expected Function");
        }
    }

    #[test]
    fn test_parse_array() {
        let ast = parse_formula("={1,2,3}").unwrap();
        if let FormulaExpr::Array(rows) = ast {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].len(), 3);
        } else {
            panic!("Expected Array");
        }

        let ast = parse_formula("={1,-2;\"a\",TRUE}").unwrap();
        assert_eq!(
            ast,
            FormulaExpr::Array(vec![
                vec![FormulaExpr::Number(1.0), FormulaExpr::Number(-2.0)],
                vec![FormulaExpr::String("a".into()), FormulaExpr::Boolean(true)],
            ])
        );

        assert!(parse_formula("={1,2;3}").is_err());
        assert!(parse_formula("={A1}").is_err());
    }

    #[test]
    fn test_parse_error_literal() {
        let ast = parse_formula("=#VALUE!").unwrap();
        assert_eq!(ast, FormulaExpr::Error(CellError::Value));

        let ast = parse_formula("=#DIV/0!").unwrap();
        assert_eq!(ast, FormulaExpr::Error(CellError::Div0));

        let ast = parse_formula("=#N/A").unwrap();
        assert_eq!(ast, FormulaExpr::Error(CellError::Na));
    }

    #[test]
    fn test_malformed_formulas() {
        for text in ["1+2", "=", "=1+", "=SUM(1,2", "=\"open", "=(1+2", "=1 2", "=A1:5", "=1 @ 2"] {
            let err = parse_formula(text).unwrap_err();
            assert!(
                matches!(err, FormulaError::Parse { .. }),
                "{} gave {:?}",
                text,
                err
            );
        }

        match parse_formula("=1+2)").unwrap_err() {
            FormulaError::Parse { position, .. } => assert_eq!(position, 4),
            other => panic!("unexpected {:?}", other),
        }
        match parse_formula("=1 @ 2").unwrap_err() {
            FormulaError::Parse { position, .. } => assert_eq!(position, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_blank_arguments() {
        let ast = parse_formula("=IF(A1,,0)").unwrap();
        let FormulaExpr::Function { args, .. } = ast else {
            panic!("expected a call, got {:?}", ast);
        };
        assert_eq!(args.len(), 3);
        assert_eq!(args[1], FormulaExpr::Missing);

        let ast = parse_formula("=IF(,1,2)").unwrap();
        assert!(matches!(ast, FormulaExpr::Function { ref args, .. } if args[0] == FormulaExpr::Missing));

        let ast = parse_formula("=VLOOKUP(D2,A1:B4,2,)").unwrap();
        assert!(matches!(ast, FormulaExpr::Function { ref args, .. }
            if args.len() == 4 && args[3] == FormulaExpr::Missing));

        // No arguments at all is still an empty list
        let ast = parse_formula("=NOW()").unwrap();
        assert!(matches!(ast, FormulaExpr::Function { ref args, .. } if args.is_empty()));
    }

    #[test]
    fn test_whole_line_references_are_rejected() {
        for text in ["=SUM(A:A)", "=SUM($B:$C)", "=COUNT(1:1)", "=VLOOKUP(1,Prices!A:B,2)"] {
            match parse_formula(text).unwrap_err() {
                FormulaError::Parse { message, .. } => {
                    assert_eq!(message, WHOLE_LINE_UNSUPPORTED, "{}", text)
                }
                other => panic!("{} gave {:?}", text, other),
            }
        }
        // Cell ranges are unaffected
        assert!(parse_formula("=SUM(A1:A9)").is_ok());
    }

    #[test]
    fn test_unknown_names_become_name_errors() {
        let ast = parse_formula("=IFERROR(Unknown,0)").unwrap();
        assert_eq!(
            ast,
            FormulaExpr::Function {
                name: "IFERROR".into(),
                args: vec![FormulaExpr::Error(CellError::Name), FormulaExpr::Number(0.0)],
            }
        );

        // Too many column letters to be an address
        let ast = parse_formula("=RATE2024").unwrap();
        assert_eq!(ast, FormulaExpr::Error(CellError::Name));
    }

    #[test]
    fn test_named_ranges_resolve_at_parse_time() {
        let names = FixedNames(vec![
            (
                "LaborRate",
                NameTarget::Reference(QualifiedRange::parse("'Labor Rates'!$B$2").unwrap()),
                false,
            ),
            (
                "Prices",
                NameTarget::Reference(QualifiedRange::parse("Data!A1:B5").unwrap()),
                true,
            ),
            ("TaxRate", NameTarget::Constant(CellValue::Number(0.0725)), false),
        ]);
        let ctx = ParseContext::new(ParserOptions::default(), &names);

        let parsed = parse_formula_with("=laborrate*TaxRate", &ctx).unwrap();
        assert_eq!(
            parsed.expr,
            FormulaExpr::BinaryOp {
                op: BinaryOperator::Multiply,
                left: Box::new(FormulaExpr::CellRef(CellReference {
                    sheet: Some("Labor Rates".into()),
                    address: CellAddress::absolute(1, 1),
                })),
                right: Box::new(FormulaExpr::Number(0.0725)),
            }
        );
        assert_eq!(parsed.names, vec!["laborrate".to_string(), "taxrate".to_string()]);
        assert!(!parsed.uses_local_names);

        let parsed = parse_formula_with("=SUM(Prices)", &ctx).unwrap();
        assert!(parsed.uses_local_names);
        if let FormulaExpr::Function { args, .. } = parsed.expr {
            assert!(matches!(&args[0], FormulaExpr::RangeRef(r) if r.range.cell_count() == 10));
        } else {
            panic!("Expected Function");
        }
    }

    #[test]
    fn test_sheet_names_resolver() {
        let mut store = CellStore::new();
        let main = store.create_sheet("Main").unwrap();
        let other = store.create_sheet("Other").unwrap();
        store
            .define_name(NamedRange::workbook_scope("Rate", "Main!$A$1").unwrap())
            .unwrap();
        store
            .define_name(NamedRange::sheet_scope("Rate", "$B$1", other).unwrap())
            .unwrap();

        let resolved = SheetNames::new(&store, main).resolve_name("RATE").unwrap();
        assert!(!resolved.local);

        let resolved = SheetNames::new(&store, other).resolve_name("rate").unwrap();
        assert!(resolved.local);
        match resolved.target {
            NameTarget::Reference(r) => assert_eq!(r.sheet.as_deref(), Some("Other")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_cell_input() {
        let ctx = ParseContext::default();
        assert_eq!(
            parse_cell_input("42.5", &ctx).unwrap(),
            CellInput::Value(CellValue::Number(42.5))
        );
        assert_eq!(
            parse_cell_input("true", &ctx).unwrap(),
            CellInput::Value(CellValue::Boolean(true))
        );
        assert_eq!(
            parse_cell_input("\"007\"", &ctx).unwrap(),
            CellInput::Value(CellValue::string("007"))
        );
        assert_eq!(
            parse_cell_input("Brush", &ctx).unwrap(),
            CellInput::Value(CellValue::string("Brush"))
        );
        assert_eq!(
            parse_cell_input("#N/A", &ctx).unwrap(),
            CellInput::Value(CellValue::Error(CellError::Na))
        );
        assert_eq!(parse_cell_input("", &ctx).unwrap(), CellInput::Value(CellValue::Empty));
        assert!(matches!(
            parse_cell_input("=1+1", &ctx).unwrap(),
            CellInput::Formula(_)
        ));
    }
}
