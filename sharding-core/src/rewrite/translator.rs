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

use std::fmt::Debug;

use log::warn;

use sharding_common::common::Result;
use sharding_common::config::DatabaseType;

use crate::parser::sql::SQLStatementContext;
use crate::rewrite::SQLRewriteUnit;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedSQL {
    pub sql: String,
    pub parameters: Vec<Value>,
}

/// Converts actual SQL into the dialect of the target storage. `Ok(None)`
/// keeps the SQL as it is.
pub trait SQLTranslator: Debug + Send + Sync {
    fn translate(
        &self,
        sql: &str,
        parameters: &[Value],
        ctx: &SQLStatementContext,
        storage_type: DatabaseType,
        database: &str,
    ) -> Result<Option<TranslatedSQL>>;
}

/// Leaves every statement in the dialect it was written in.
#[derive(Debug, Default)]
pub struct NativeSQLTranslator;

impl SQLTranslator for NativeSQLTranslator {
    fn translate(&self, _: &str, _: &[Value], _: &SQLStatementContext, _: DatabaseType, _: &str) -> Result<Option<TranslatedSQL>> {
        Ok(None)
    }
}

/// A failing translation keeps the untranslated unit.
pub fn translate(
    translator: Option<&dyn SQLTranslator>,
    unit: SQLRewriteUnit,
    ctx: &SQLStatementContext,
    storage_type: DatabaseType,
    database: &str,
) -> SQLRewriteUnit {
    let translator = match translator {
        Some(translator) => translator,
        None => return unit,
    };
    match translator.translate(&unit.sql, &unit.parameters, ctx, storage_type, database) {
        Ok(Some(translated)) => SQLRewriteUnit { sql: translated.sql, parameters: translated.parameters },
        Ok(None) => unit,
        Err(e) => {
            warn!("translate sql for {} failed, keep original: {}", database, e);
            unit
        }
    }
}
