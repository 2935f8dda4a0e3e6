//! Filter DSL for OSM objects and tags.
//!
//! Syntax:
//!   key                     - tag exists
//!   key=value               - exact match (numeric if value starts with a digit)
//!   key!=value              - mismatch; also true in keep lists if key is absent
//!   key<v, key<=v, key>v, key>=v - ordered comparison
//!   key=pre* key=*suf key=*mid* key=* - wildcards
//!   =value                  - same key as the previous pair
//!   expr1 expr2             - OR (default joining)
//!   expr1 and expr2         - AND (also AND, &&), binds tighter than OR
//!   expr1 or expr2          - OR (also OR, ||)
//!   ( expr )                - grouping, brackets must be separate words
//!   all expr                - pairs with their own key are joined with AND
//!   \x                      - literal x (e.g. `\ ` or `\*`)
//!
//! Pseudo keys `@id`, `@uid` and `@user` test the object id and author.

mod ast;
mod compare;
mod eval;
mod lexer;
mod parser;
mod set;
mod tags;

pub use set::{FilterSet, FilterTexts};
