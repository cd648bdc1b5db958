//! Allocation-free Itanium C++ ABI demangler.
//!
//! Produces the short form of a name: namespaces, classes, operators,
//! constructors and destructors are printed, template argument lists are
//! collapsed to `<>` and function parameter lists are dropped entirely:
//!
//! | mangled                      | short form          |
//! |------------------------------|---------------------|
//! | `_Z1fv`                      | `f`                 |
//! | `_ZN3Foo3BarEv`              | `Foo::Bar`          |
//! | `_ZN3FooIiEC1Ev`             | `Foo<>::Foo`        |
//! | `_ZNSt6vectorIiSaIiEE9push_backERKi` | `std::vector<>::push_back` |
//!
//! The parser never allocates, keeps all state in a small `Copy` struct on
//! the stack, bounds its recursion depth and total work, and writes only
//! into the caller's buffer, which makes it usable from contexts where the
//! allocator may not be re-entered.

/// Deepest nesting of recursive productions accepted.
const MAX_DEPTH: u32 = 256;

/// Upper bound on parse steps, guarding against pathological backtracking.
const MAX_STEPS: u32 = 1 << 16;

#[derive(Clone, Copy)]
struct Cursor
{
    pos: usize,
    /// Bytes the output would hold with unlimited room.
    out_len: usize,
    last_char: u8,
    /// Range in the input of the most recent printed source name.
    prev_name: (usize, usize),
    /// -1 outside nested names, otherwise the number of components printed.
    nest_level: i32,
    append: bool,
}

struct Demangler<'m, 'o>
{
    input: &'m [u8],
    out: &'o mut [u8],
    st: Cursor,
    depth: u32,
    steps: u32,
}

const OPERATORS: &[(&[u8; 2], &str)] = &[
    (b"nw", "new"),
    (b"na", "new[]"),
    (b"dl", "delete"),
    (b"da", "delete[]"),
    (b"ps", "+"),
    (b"ng", "-"),
    (b"ad", "&"),
    (b"de", "*"),
    (b"co", "~"),
    (b"pl", "+"),
    (b"mi", "-"),
    (b"ml", "*"),
    (b"dv", "/"),
    (b"rm", "%"),
    (b"an", "&"),
    (b"or", "|"),
    (b"eo", "^"),
    (b"aS", "="),
    (b"pL", "+="),
    (b"mI", "-="),
    (b"mL", "*="),
    (b"dV", "/="),
    (b"rM", "%="),
    (b"aN", "&="),
    (b"oR", "|="),
    (b"eO", "^="),
    (b"ls", "<<"),
    (b"rs", ">>"),
    (b"lS", "<<="),
    (b"rS", ">>="),
    (b"eq", "=="),
    (b"ne", "!="),
    (b"lt", "<"),
    (b"gt", ">"),
    (b"le", "<="),
    (b"ge", ">="),
    (b"ss", "<=>"),
    (b"nt", "!"),
    (b"aa", "&&"),
    (b"oo", "||"),
    (b"pp", "++"),
    (b"mm", "--"),
    (b"cm", ","),
    (b"pm", "->*"),
    (b"pt", "->"),
    (b"cl", "()"),
    (b"ix", "[]"),
    (b"qu", "?"),
    (b"st", "sizeof"),
    (b"sz", "sizeof"),
    (b"at", "alignof"),
    (b"az", "alignof"),
    (b"aw", "co_await"),
];

const BUILTINS: &[(u8, &str)] = &[
    (b'v', "void"),
    (b'w', "wchar_t"),
    (b'b', "bool"),
    (b'c', "char"),
    (b'a', "signed char"),
    (b'h', "unsigned char"),
    (b's', "short"),
    (b't', "unsigned short"),
    (b'i', "int"),
    (b'j', "unsigned int"),
    (b'l', "long"),
    (b'm', "unsigned long"),
    (b'x', "long long"),
    (b'y', "unsigned long long"),
    (b'n', "__int128"),
    (b'o', "unsigned __int128"),
    (b'f', "float"),
    (b'd', "double"),
    (b'e', "long double"),
    (b'g', "__float128"),
    (b'z', "..."),
];

const BUILTINS_D: &[(u8, &str)] = &[
    (b'd', "decimal64"),
    (b'e', "decimal128"),
    (b'f', "decimal32"),
    (b'h', "half"),
    (b'i', "char32_t"),
    (b's', "char16_t"),
    (b'u', "char8_t"),
    (b'a', "auto"),
    (b'c', "decltype(auto)"),
    (b'n', "std::nullptr_t"),
];

const SUBSTITUTIONS: &[(u8, &str)] = &[
    (b't', "std"),
    (b'a', "std::allocator"),
    (b'b', "std::basic_string"),
    (b's', "std::string"),
    (b'i', "std::istream"),
    (b'o', "std::ostream"),
    (b'd', "std::iostream"),
];

/// Demangle `mangled` into `out`.
///
/// Returns the number of bytes, terminator included, the complete short
/// form needs. When that exceeds `out.len()` the buffer holds a
/// NUL-terminated prefix and the caller may retry with a buffer of the
/// returned size.
///
/// Returns 0 when `mangled` is not an Itanium name or is malformed; the
/// buffer then holds `mangled` verbatim (truncated to fit).
pub fn demangle(mangled: &[u8], out: &mut [u8]) -> usize
{
    let mut demangler = Demangler {
        input: mangled,
        out,
        st: Cursor {
            pos: 0,
            out_len: 0,
            last_char: 0,
            prev_name: (0, 0),
            nest_level: -1,
            append: true,
        },
        depth: 0,
        steps: 0,
    };

    if demangler.parse_top_level() {
        let len = demangler.st.out_len;
        demangler.terminate(len);
        len + 1
    } else {
        crate::types::symbols::copy_truncated(mangled, demangler.out);
        0
    }
}

/// Whether `name` uses the Itanium mangling prefix.
#[must_use]
pub fn is_mangled(name: &[u8]) -> bool
{
    name.starts_with(b"_Z")
}

impl Demangler<'_, '_>
{
    fn terminate(&mut self, len: usize)
    {
        if let Some(room) = self.out.len().checked_sub(1) {
            self.out[len.min(room)] = 0;
        }
    }

    fn peek(&self) -> u8
    {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> u8
    {
        self.input.get(self.st.pos + offset).copied().unwrap_or(0)
    }

    fn remaining(&self) -> usize
    {
        self.input.len().saturating_sub(self.st.pos)
    }

    fn one(&mut self, c: u8) -> bool
    {
        if self.peek() == c && c != 0 {
            self.st.pos += 1;
            true
        } else {
            false
        }
    }

    fn two(&mut self, token: &[u8; 2]) -> bool
    {
        if self.peek() == token[0] && self.peek_at(1) == token[1] {
            self.st.pos += 2;
            true
        } else {
            false
        }
    }

    fn char_class(&mut self, set: &[u8]) -> bool
    {
        let c = self.peek();
        if c != 0 && set.contains(&c) {
            self.st.pos += 1;
            true
        } else {
            false
        }
    }

    fn guarded(&mut self, parse: fn(&mut Self) -> bool) -> bool
    {
        if self.depth >= MAX_DEPTH || self.steps >= MAX_STEPS {
            return false;
        }
        self.depth += 1;
        self.steps += 1;
        let ok = parse(self);
        self.depth -= 1;
        ok
    }

    fn one_or_more(&mut self, parse: fn(&mut Self) -> bool) -> bool
    {
        if !parse(self) {
            return false;
        }
        while parse(self) {}
        true
    }

    fn zero_or_more(&mut self, parse: fn(&mut Self) -> bool) -> bool
    {
        while parse(self) {}
        true
    }

    fn push_byte(&mut self, c: u8)
    {
        let at = self.st.out_len;
        if at + 1 < self.out.len() {
            self.out[at] = c;
        }
        self.st.out_len += 1;
        self.st.last_char = c;
    }

    fn append(&mut self, text: &[u8])
    {
        if !self.st.append || text.is_empty() {
            return;
        }
        // Keep `<<` from forming when a template list follows an operator.
        if text[0] == b'<' && self.st.last_char == b'<' {
            self.push_byte(b' ');
        }
        for &c in text {
            self.push_byte(c);
        }
    }

    fn append_str(&mut self, text: &str)
    {
        self.append(text.as_bytes());
    }

    fn append_input(&mut self, start: usize, end: usize)
    {
        let input = self.input;
        self.append(&input[start..end]);
    }

    fn append_number(&mut self, mut value: u64)
    {
        let mut digits = [0u8; 20];
        let mut len = 0;
        loop {
            digits[len] = b'0' + (value % 10) as u8;
            len += 1;
            value /= 10;
            if value == 0 {
                break;
            }
        }
        digits[..len].reverse();
        self.append(&digits[..len]);
    }

    fn disable_append(&mut self) -> bool
    {
        let was = self.st.append;
        self.st.append = false;
        was
    }

    fn maybe_append_separator(&mut self)
    {
        if self.st.nest_level >= 1 {
            self.append(b"::");
        }
    }

    fn maybe_increase_nest_level(&mut self)
    {
        if self.st.nest_level > -1 {
            self.st.nest_level += 1;
        }
    }

    fn maybe_cancel_last_separator(&mut self)
    {
        if self.st.nest_level >= 1 && self.st.append && self.st.out_len >= 2 {
            self.st.out_len -= 2;
            let at = self.st.out_len;
            self.st.last_char = if at > 0 && at <= self.out.len() { self.out[at - 1] } else { 0 };
        }
    }

    // <mangled-name> ::= _Z <encoding> [ . <clone suffix> ]
    fn parse_top_level(&mut self) -> bool
    {
        if !self.two(b"_Z") || !self.guarded(Self::parse_encoding) {
            return false;
        }
        if self.remaining() == 0 {
            return true;
        }
        if self.peek() == b'.' {
            let (start, end) = (self.st.pos, self.input.len());
            self.append_input(start, end);
            self.st.pos = end;
            return true;
        }
        false
    }

    // <encoding> ::= <name> <bare-function-type> | <name> | <special-name>
    fn parse_encoding(&mut self) -> bool
    {
        let copy = self.st;
        if self.guarded(Self::parse_name) && self.parse_bare_function_type() {
            return true;
        }
        self.st = copy;
        if self.guarded(Self::parse_name) || self.parse_special_name() {
            return true;
        }
        self.st = copy;
        false
    }

    // <name> ::= <nested-name> | <unscoped-template-name> <template-args>
    //        ::= <unscoped-name> | <local-name>
    fn parse_name(&mut self) -> bool
    {
        if self.parse_nested_name() || self.parse_local_name() {
            return true;
        }
        let copy = self.st;
        if self.parse_unscoped_template_name() && self.parse_template_args() {
            return true;
        }
        self.st = copy;
        if self.parse_unscoped_name() {
            return true;
        }
        self.st = copy;
        false
    }

    // <unscoped-name> ::= <unqualified-name> | St <unqualified-name>
    fn parse_unscoped_name(&mut self) -> bool
    {
        if self.parse_unqualified_name() {
            return true;
        }
        let copy = self.st;
        if self.two(b"St") {
            self.append(b"std::");
            if self.parse_unqualified_name() {
                return true;
            }
        }
        self.st = copy;
        false
    }

    fn parse_unscoped_template_name(&mut self) -> bool
    {
        self.parse_unscoped_name() || self.parse_substitution()
    }

    // <nested-name> ::= N [<CV-qualifiers>] [<ref-qualifier>] <prefix> <unqualified-name> E
    fn parse_nested_name(&mut self) -> bool
    {
        let copy = self.st;
        if self.one(b'N') {
            self.st.nest_level = 0;
            self.parse_cv_qualifiers();
            self.char_class(b"RO");
            if self.parse_prefix() {
                self.st.nest_level = copy.nest_level;
                if self.one(b'E') {
                    return true;
                }
            }
        }
        self.st = copy;
        false
    }

    // A prefix is a sequence of components, each possibly followed by
    // template arguments; the final component doubles as the
    // unqualified-name of the nested-name production.
    fn parse_prefix(&mut self) -> bool
    {
        let mut has_something = false;
        loop {
            self.maybe_append_separator();
            if self.parse_template_param() || self.parse_substitution() || self.parse_unscoped_name() {
                has_something = true;
                self.maybe_increase_nest_level();
                continue;
            }
            self.maybe_cancel_last_separator();
            if has_something && self.parse_template_args() {
                continue;
            }
            if self.parse_decltype() {
                has_something = true;
                continue;
            }
            break;
        }
        has_something
    }

    // <unqualified-name> ::= <operator-name> | <ctor-dtor-name> | <source-name>
    //                    ::= <local-source-name> | <unnamed-type-name>
    fn parse_unqualified_name(&mut self) -> bool
    {
        let matched = self.parse_operator_name()
            || self.parse_ctor_dtor_name()
            || self.parse_source_name()
            || self.parse_local_source_name()
            || self.parse_unnamed_type_name();
        if matched {
            self.parse_abi_tags();
        }
        matched
    }

    fn parse_abi_tags(&mut self)
    {
        loop {
            let copy = self.st;
            let was = self.disable_append();
            if self.one(b'B') && self.parse_source_name() {
                self.st.append = was;
            } else {
                self.st = copy;
                return;
            }
        }
    }

    // <source-name> ::= <positive length number> <identifier>
    fn parse_source_name(&mut self) -> bool
    {
        let copy = self.st;
        let Some(length) = self.parse_number() else {
            return false;
        };
        let Ok(length) = usize::try_from(length) else {
            self.st = copy;
            return false;
        };
        if length == 0 || length > self.remaining() {
            self.st = copy;
            return false;
        }
        let start = self.st.pos;
        let end = start + length;
        if self.input[start..end].starts_with(b"_GLOBAL__N") {
            self.append(b"(anonymous namespace)");
        } else {
            if self.st.append {
                self.st.prev_name = (start, end);
            }
            self.append_input(start, end);
        }
        self.st.pos = end;
        true
    }

    // <local-source-name> ::= L <source-name> [<discriminator>]
    fn parse_local_source_name(&mut self) -> bool
    {
        let copy = self.st;
        if self.one(b'L') && self.parse_source_name() {
            self.parse_discriminator();
            return true;
        }
        self.st = copy;
        false
    }

    // <unnamed-type-name> ::= Ut [<number>] _
    //                     ::= Ul <lambda-sig> E [<number>] _
    fn parse_unnamed_type_name(&mut self) -> bool
    {
        let copy = self.st;
        if self.two(b"Ut") {
            let which = self.parse_number().unwrap_or(-1);
            if self.one(b'_') {
                self.append(b"{unnamed type#");
                self.append_number(u64::try_from(which.saturating_add(2)).unwrap_or(0));
                self.append(b"}");
                return true;
            }
        }
        self.st = copy;
        if self.two(b"Ul") {
            let was = self.disable_append();
            if self.one_or_more(Self::parse_type_guarded) && self.one(b'E') {
                self.st.append = was;
                let which = self.parse_number().unwrap_or(-1);
                if self.one(b'_') {
                    self.append(b"{lambda()#");
                    self.append_number(u64::try_from(which.saturating_add(2)).unwrap_or(0));
                    self.append(b"}");
                    return true;
                }
            }
        }
        self.st = copy;
        false
    }

    // <number> ::= [n] <non-negative decimal integer>
    fn parse_number(&mut self) -> Option<i64>
    {
        let copy = self.st;
        let negative = self.one(b'n');
        let start = self.st.pos;
        let mut value: i64 = 0;
        while self.peek().is_ascii_digit() {
            value = value.saturating_mul(10).saturating_add(i64::from(self.peek() - b'0'));
            self.st.pos += 1;
        }
        if self.st.pos == start {
            self.st = copy;
            return None;
        }
        Some(if negative { -value } else { value })
    }

    // <seq-id> ::= [0-9A-Z]+
    fn parse_seq_id(&mut self) -> bool
    {
        let start = self.st.pos;
        while matches!(self.peek(), b'0'..=b'9' | b'A'..=b'Z') {
            self.st.pos += 1;
        }
        self.st.pos != start
    }

    // <discriminator> := _ <number> | __ <number> _
    fn parse_discriminator(&mut self) -> bool
    {
        let copy = self.st;
        if self.two(b"__") && self.parse_number().is_some() && self.one(b'_') {
            return true;
        }
        self.st = copy;
        if self.one(b'_') && self.parse_number().is_some() {
            return true;
        }
        self.st = copy;
        false
    }

    // <operator-name> ::= <two-letter code> | cv <type> | v <digit> <source-name>
    fn parse_operator_name(&mut self) -> bool
    {
        if self.remaining() < 2 {
            return false;
        }
        let copy = self.st;
        if self.two(b"cv") {
            self.append(b"operator ");
            let nest = self.st.nest_level;
            self.st.nest_level = 0;
            if self.guarded(Self::parse_type) {
                self.st.nest_level = nest;
                return true;
            }
        }
        self.st = copy;

        if self.one(b'v') && self.peek().is_ascii_digit() {
            self.st.pos += 1;
            self.append(b"operator ");
            if self.parse_source_name() {
                return true;
            }
        }
        self.st = copy;

        let (first, second) = (self.peek(), self.peek_at(1));
        if !(first.is_ascii_lowercase() && second.is_ascii_alphabetic()) {
            return false;
        }
        for (code, text) in OPERATORS {
            if code[0] == first && code[1] == second {
                self.st.pos += 2;
                self.append(b"operator");
                if text.as_bytes()[0].is_ascii_lowercase() {
                    self.append(b" ");
                }
                self.append_str(text);
                return true;
            }
        }
        false
    }

    // <special-name> ::= TV <type> | TT <type> | TI <type> | TS <type>
    //                ::= Tc <call-offset> <call-offset> <encoding>
    //                ::= GV <name> | GR <name> | GA <encoding>
    //                ::= T <call-offset> <encoding>
    //                ::= TC <type> <number> _ <type>
    //                ::= TH <name> | TW <name>
    fn parse_special_name(&mut self) -> bool
    {
        let copy = self.st;
        if self.one(b'T') && self.char_class(b"VTIS") && self.guarded(Self::parse_type) {
            return true;
        }
        self.st = copy;
        if self.two(b"Tc")
            && self.parse_call_offset()
            && self.parse_call_offset()
            && self.guarded(Self::parse_encoding)
        {
            return true;
        }
        self.st = copy;
        if self.two(b"GV") && self.guarded(Self::parse_name) {
            return true;
        }
        self.st = copy;
        if self.one(b'T') && self.parse_call_offset() && self.guarded(Self::parse_encoding) {
            return true;
        }
        self.st = copy;
        if self.two(b"TC") && self.guarded(Self::parse_type) && self.parse_number().is_some() && self.one(b'_') {
            let was = self.disable_append();
            if self.guarded(Self::parse_type) {
                self.st.append = was;
                return true;
            }
        }
        self.st = copy;
        if self.one(b'T') && self.char_class(b"FJHW") && self.guarded(Self::parse_type) {
            return true;
        }
        self.st = copy;
        if self.two(b"GR") && self.guarded(Self::parse_name) {
            self.parse_seq_id();
            self.one(b'_');
            return true;
        }
        self.st = copy;
        if self.two(b"GA") && self.guarded(Self::parse_encoding) {
            return true;
        }
        self.st = copy;
        false
    }

    // <call-offset> ::= h <nv-offset> _ | v <v-offset> _
    fn parse_call_offset(&mut self) -> bool
    {
        let copy = self.st;
        if self.one(b'h') && self.parse_number().is_some() && self.one(b'_') {
            return true;
        }
        self.st = copy;
        if self.one(b'v')
            && self.parse_number().is_some()
            && self.one(b'_')
            && self.parse_number().is_some()
            && self.one(b'_')
        {
            return true;
        }
        self.st = copy;
        false
    }

    // <ctor-dtor-name> ::= C1 | C2 | C3 | C4 | C5 | CI1 <type> | CI2 <type>
    //                  ::= D0 | D1 | D2 | D4 | D5
    fn parse_ctor_dtor_name(&mut self) -> bool
    {
        let copy = self.st;
        if self.one(b'C') {
            let inheriting = self.one(b'I');
            if self.char_class(b"12345") && (!inheriting || self.parse_inheriting_type()) {
                let (start, end) = self.st.prev_name;
                self.append_input(start, end);
                return true;
            }
        }
        self.st = copy;
        if self.one(b'D') && self.char_class(b"01245") {
            self.append(b"~");
            let (start, end) = self.st.prev_name;
            self.append_input(start, end);
            return true;
        }
        self.st = copy;
        false
    }

    fn parse_inheriting_type(&mut self) -> bool
    {
        let was = self.disable_append();
        let ok = self.guarded(Self::parse_type);
        self.st.append = was;
        ok
    }

    fn parse_type_guarded(&mut self) -> bool
    {
        self.guarded(Self::parse_type)
    }

    // <type> ::= <CV-qualifiers> <type> | P <type> | R <type> | O <type>
    //        ::= C <type> | G <type> | Dp <type> | U <source-name> <type>
    //        ::= <builtin-type> | <function-type> | <class-enum-type>
    //        ::= <array-type> | <pointer-to-member-type> | <decltype>
    //        ::= <template-template-param> <template-args>
    //        ::= <template-param> | <substitution>
    fn parse_type(&mut self) -> bool
    {
        let copy = self.st;
        if self.parse_cv_qualifiers() && self.guarded(Self::parse_type) {
            return true;
        }
        self.st = copy;
        if self.char_class(b"OPRCG") && self.guarded(Self::parse_type) {
            return true;
        }
        self.st = copy;
        if self.two(b"Dp") && self.guarded(Self::parse_type) {
            return true;
        }
        self.st = copy;
        if self.parse_decltype() {
            return true;
        }
        self.st = copy;
        if self.two(b"Dv") && self.parse_number().is_some() && self.one(b'_') && self.guarded(Self::parse_type) {
            return true;
        }
        self.st = copy;
        if self.one(b'U') && self.parse_source_name() && self.guarded(Self::parse_type) {
            return true;
        }
        self.st = copy;
        if self.parse_builtin_type()
            || self.parse_function_type()
            || self.parse_class_enum_type()
            || self.parse_array_type()
            || self.parse_pointer_to_member_type()
        {
            return true;
        }
        self.st = copy;
        if (self.parse_template_param() || self.parse_substitution()) && self.parse_template_args() {
            return true;
        }
        self.st = copy;
        if self.parse_template_param() || self.parse_substitution() {
            return true;
        }
        self.st = copy;
        false
    }

    // <CV-qualifiers> ::= [r] [V] [K]
    fn parse_cv_qualifiers(&mut self) -> bool
    {
        let mut count = 0;
        for c in [b'r', b'V', b'K'] {
            if self.one(c) {
                count += 1;
            }
        }
        count > 0
    }

    // <decltype> ::= Dt <expression> E | DT <expression> E
    fn parse_decltype(&mut self) -> bool
    {
        let copy = self.st;
        if self.one(b'D') && self.char_class(b"tT") && self.guarded(Self::parse_expression) && self.one(b'E') {
            return true;
        }
        self.st = copy;
        false
    }

    fn parse_builtin_type(&mut self) -> bool
    {
        let c = self.peek();
        if let Some((_, name)) = BUILTINS.iter().find(|(code, _)| *code == c) {
            self.st.pos += 1;
            self.append_str(name);
            return true;
        }
        if c == b'D' {
            let d = self.peek_at(1);
            if let Some((_, name)) = BUILTINS_D.iter().find(|(code, _)| *code == d) {
                self.st.pos += 2;
                self.append_str(name);
                return true;
            }
        }
        let copy = self.st;
        if self.one(b'u') && self.parse_source_name() {
            return true;
        }
        self.st = copy;
        false
    }

    // <function-type> ::= F [Y] <bare-function-type> [<ref-qualifier>] E
    fn parse_function_type(&mut self) -> bool
    {
        let copy = self.st;
        if self.one(b'F') {
            self.one(b'Y');
            if self.parse_bare_function_type() {
                self.char_class(b"RO");
                if self.one(b'E') {
                    return true;
                }
            }
        }
        self.st = copy;
        false
    }

    // <bare-function-type> ::= <(signature) type>+
    //
    // Parameter types are consumed but never printed.
    fn parse_bare_function_type(&mut self) -> bool
    {
        let copy = self.st;
        let was = self.disable_append();
        if self.one_or_more(Self::parse_type_guarded) {
            self.st.append = was;
            return true;
        }
        self.st = copy;
        false
    }

    // <class-enum-type> ::= <name>
    fn parse_class_enum_type(&mut self) -> bool
    {
        self.guarded(Self::parse_name)
    }

    // <array-type> ::= A <(positive dimension) number> _ <(element) type>
    //              ::= A [<(dimension) expression>] _ <(element) type>
    fn parse_array_type(&mut self) -> bool
    {
        let copy = self.st;
        if self.one(b'A') && self.parse_number().is_some() && self.one(b'_') && self.guarded(Self::parse_type) {
            return true;
        }
        self.st = copy;
        if self.one(b'A') {
            self.guarded(Self::parse_expression);
            if self.one(b'_') && self.guarded(Self::parse_type) {
                return true;
            }
        }
        self.st = copy;
        false
    }

    // <pointer-to-member-type> ::= M <(class) type> <(member) type>
    fn parse_pointer_to_member_type(&mut self) -> bool
    {
        let copy = self.st;
        if self.one(b'M') && self.guarded(Self::parse_type) && self.guarded(Self::parse_type) {
            return true;
        }
        self.st = copy;
        false
    }

    // <template-param> ::= T_ | T <parameter-2 non-negative number> _
    fn parse_template_param(&mut self) -> bool
    {
        if self.two(b"T_") {
            self.append(b"?");
            return true;
        }
        let copy = self.st;
        if self.one(b'T') && self.parse_number().is_some() && self.one(b'_') {
            self.append(b"?");
            return true;
        }
        self.st = copy;
        false
    }

    // <template-args> ::= I <template-arg>+ E
    //
    // Arguments are consumed but printed as `<>`.
    fn parse_template_args(&mut self) -> bool
    {
        let copy = self.st;
        let was = self.disable_append();
        if self.one(b'I') && self.one_or_more(Self::parse_template_arg) && self.one(b'E') {
            self.st.append = was;
            self.append(b"<>");
            return true;
        }
        self.st = copy;
        false
    }

    // <template-arg> ::= <type> | L <expr-primary> | X <expression> E
    //                ::= J <template-arg>* E
    fn parse_template_arg(&mut self) -> bool
    {
        let copy = self.st;
        if (self.one(b'J') || self.one(b'I')) && self.guarded(Self::parse_template_arg_pack) && self.one(b'E') {
            return true;
        }
        self.st = copy;
        if self.guarded(Self::parse_type) || self.parse_expr_primary() {
            return true;
        }
        self.st = copy;
        if self.one(b'X') && self.guarded(Self::parse_expression) && self.one(b'E') {
            return true;
        }
        self.st = copy;
        false
    }

    fn parse_template_arg_pack(&mut self) -> bool
    {
        self.zero_or_more(Self::parse_template_arg)
    }

    // <expression> ::= <template-param> | <expr-primary> | <function-param>
    //              ::= <operator-name> <expression>{1,3}
    //              ::= st <type> | sr <type> <unqualified-name> [<template-args>]
    fn parse_expression(&mut self) -> bool
    {
        if self.parse_template_param() || self.parse_expr_primary() || self.parse_function_param() {
            return true;
        }
        let copy = self.st;
        if self.parse_operator_name()
            && self.guarded(Self::parse_expression)
            && self.guarded(Self::parse_expression)
            && self.guarded(Self::parse_expression)
        {
            return true;
        }
        self.st = copy;
        if self.parse_operator_name() && self.guarded(Self::parse_expression) && self.guarded(Self::parse_expression) {
            return true;
        }
        self.st = copy;
        if self.parse_operator_name() && self.guarded(Self::parse_expression) {
            return true;
        }
        self.st = copy;
        if self.two(b"st") && self.guarded(Self::parse_type) {
            return true;
        }
        self.st = copy;
        if self.two(b"sr") && self.guarded(Self::parse_type) && self.parse_unqualified_name() {
            self.parse_template_args();
            return true;
        }
        self.st = copy;
        false
    }

    // <function-param> ::= fp [<CV-qualifiers>] [<number>] _
    //                  ::= fL <number> p [<CV-qualifiers>] [<number>] _
    fn parse_function_param(&mut self) -> bool
    {
        let copy = self.st;
        if self.two(b"fp") {
            self.parse_cv_qualifiers();
            self.parse_number();
            if self.one(b'_') {
                return true;
            }
        }
        self.st = copy;
        if self.two(b"fL") && self.parse_number().is_some() && self.one(b'p') {
            self.parse_cv_qualifiers();
            self.parse_number();
            if self.one(b'_') {
                return true;
            }
        }
        self.st = copy;
        false
    }

    // <expr-primary> ::= L <type> <(value) number> E
    //                ::= L <type> <(value) float> E
    //                ::= L <mangled-name> E
    //                ::= LZ <encoding> E
    fn parse_expr_primary(&mut self) -> bool
    {
        let copy = self.st;
        if self.two(b"LZ") && self.guarded(Self::parse_encoding) && self.one(b'E') {
            return true;
        }
        self.st = copy;
        if self.one(b'L')
            && (self.two(b"_Z") || (self.one(b'_') && self.two(b"_Z")))
            && self.guarded(Self::parse_encoding)
            && self.one(b'E')
        {
            return true;
        }
        self.st = copy;
        if self.one(b'L') && self.guarded(Self::parse_type) {
            let was = self.disable_append();
            self.one(b'n');
            while self.peek().is_ascii_hexdigit() || self.peek() == b'.' {
                self.st.pos += 1;
            }
            self.st.append = was;
            if self.one(b'E') {
                return true;
            }
        }
        self.st = copy;
        false
    }

    // <local-name> ::= Z <(function) encoding> E <(entity) name> [<discriminator>]
    //              ::= Z <(function) encoding> E s [<discriminator>]
    fn parse_local_name(&mut self) -> bool
    {
        let copy = self.st;
        if self.one(b'Z') && self.guarded(Self::parse_encoding) && self.one(b'E') {
            self.append(b"::");
            let entity = self.st;
            if self.one(b's') {
                self.parse_discriminator();
                self.append(b"string literal");
                return true;
            }
            self.st = entity;
            if self.guarded(Self::parse_name) {
                self.parse_discriminator();
                return true;
            }
        }
        self.st = copy;
        false
    }

    // <substitution> ::= S_ | S <seq-id> _ | St | Sa | Sb | Ss | Si | So | Sd
    fn parse_substitution(&mut self) -> bool
    {
        if self.two(b"S_") {
            self.append(b"?");
            return true;
        }
        let copy = self.st;
        if self.one(b'S') && self.parse_seq_id() && self.one(b'_') {
            self.append(b"?");
            return true;
        }
        self.st = copy;
        if self.one(b'S') {
            let c = self.peek();
            if let Some((_, name)) = SUBSTITUTIONS.iter().find(|(code, _)| *code == c) {
                self.st.pos += 1;
                self.append_str(name);
                return true;
            }
        }
        self.st = copy;
        false
    }
}
