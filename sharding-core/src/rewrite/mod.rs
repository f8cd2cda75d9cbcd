// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Rewrites a logic statement into actual SQL and parameters per route unit.

use std::fmt::Write;

use crate::discovery::database::ShardingRule;
use crate::handler::generated_key::GeneratedKeyContext;
use crate::parser::sql::SQLStatementContext;
use crate::rewrite::builder::parameter::ParameterBuilder;
use crate::rewrite::token::generator::{generate_sql_tokens, is_generate_sql_token, GeneratorContext};
use crate::rewrite::token::SQLToken;
use crate::route::{RouteContext, RouteUnit};
use crate::value::Value;

pub mod builder;
pub mod engine;
pub mod token;
pub mod translator;

pub type SRWResult = sharding_common::common::Result<()>;

/// Renders a piece of SQL for one route unit, or for the logic statement
/// itself when no unit is given.
pub trait SQLReWrite {
    fn rewrite(&self, f: &mut String, unit: Option<&RouteUnit>) -> SRWResult;
}

struct DisplaySeparated<'a, T>
where
    T: SQLReWrite,
{
    slice: &'a [&'a T],
    sep: &'static str,
}

impl<'a, T> SQLReWrite for DisplaySeparated<'a, T>
where
    T: SQLReWrite,
{
    fn rewrite(&self, f: &mut String, unit: Option<&RouteUnit>) -> SRWResult {
        let mut delim = "";
        for t in self.slice {
            write!(f, "{}", delim)?;
            delim = self.sep;
            t.rewrite(f, unit)?;
        }
        Ok(())
    }
}

fn display_comma_separated<'a, T>(slice: &'a [&'a T]) -> DisplaySeparated<'a, T>
where
    T: SQLReWrite,
{
    DisplaySeparated { slice, sep: ", " }
}

/// Actual SQL and parameters for one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct SQLRewriteUnit {
    pub sql: String,
    pub parameters: Vec<Value>,
}

/// Tokens and parameter builder compiled once per statement.
#[derive(Debug)]
pub struct SQLRewriteContext<'a> {
    pub ctx: &'a SQLStatementContext,
    pub rule: &'a ShardingRule,
    pub route_context: &'a RouteContext,
    pub parameters: &'a [Value],
    pub tokens: Vec<SQLToken>,
    pub parameter_builder: ParameterBuilder,
}

impl<'a> SQLRewriteContext<'a> {
    pub fn new(
        ctx: &'a SQLStatementContext,
        rule: &'a ShardingRule,
        route_context: &'a RouteContext,
        parameters: &'a [Value],
        generated_key: Option<&'a GeneratedKeyContext>,
    ) -> Self {
        let generator_ctx = GeneratorContext { ctx, rule, route_context, parameters, generated_key };
        let tokens = generate_sql_tokens(&generator_ctx);
        let parameter_builder = ParameterBuilder::new(ctx, parameters, generated_key, &tokens);
        SQLRewriteContext { ctx, rule, route_context, parameters, tokens, parameter_builder }
    }

    /// A context with no tokens, for statements no generator touches.
    pub fn without_tokens(ctx: &'a SQLStatementContext, rule: &'a ShardingRule, route_context: &'a RouteContext, parameters: &'a [Value]) -> Self {
        let parameter_builder = ParameterBuilder::new(ctx, parameters, None, &[]);
        SQLRewriteContext { ctx, rule, route_context, parameters, tokens: vec![], parameter_builder }
    }

    /// Whether any token generator applies to this statement shape.
    pub fn needs_rewrite(ctx: &SQLStatementContext, rule: &ShardingRule, generated_key: Option<&GeneratedKeyContext>) -> bool {
        is_generate_sql_token(ctx, rule, generated_key)
    }
}
