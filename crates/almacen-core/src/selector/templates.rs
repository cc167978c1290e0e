//! Instruction templates wrapped around the packed sources.
//!
//! `Locale::Es` carries the assistant's production wording; `Locale::En` states the
//! same rules in English. Both produce the same fragment layout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Language of the fixed instruction strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Es,
    En,
}

impl Locale {
    pub fn code(&self) -> &'static str {
        match self {
            Locale::Es => "es",
            Locale::En => "en",
        }
    }

    pub fn templates(&self) -> &'static InstructionTemplates {
        match self {
            Locale::Es => &ES,
            Locale::En => &EN,
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown locale: {0}")]
pub struct UnknownLocale(pub String);

impl FromStr for Locale {
    type Err = UnknownLocale;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "es" | "es-ar" | "spanish" => Ok(Locale::Es),
            "en" | "en-us" | "english" => Ok(Locale::En),
            other => Err(UnknownLocale(other.to_string())),
        }
    }
}

/// Fixed strings for one locale.
#[derive(Debug)]
pub struct InstructionTemplates {
    /// Answer only from sources: summary, markdown table, conclusion; one row per source row.
    pub strict_preamble: &'static str,
    /// Enrich with context, prefer markdown tables, outside knowledge allowed.
    pub hybrid_preamble: &'static str,
    /// Source header prefix; the title follows, then `source_header_suffix`.
    pub source_header_prefix: &'static str,
    pub source_header_suffix: &'static str,
    pub begin_sources: &'static str,
    pub end_sources: &'static str,
    /// Strict-mode fragment when nothing was packed.
    pub no_documents: &'static str,
    /// Sentence the model must answer with when the sources lack the information.
    pub no_information: &'static str,
    /// Label placed before the literal user question in the final prompt.
    pub question_label: &'static str,
}

impl InstructionTemplates {
    pub fn preamble(&self, strict: bool) -> &'static str {
        if strict {
            self.strict_preamble
        } else {
            self.hybrid_preamble
        }
    }

    /// One packed document: header line, raw content, trailing newline.
    pub fn source_block(&self, title: &str, content: &str) -> String {
        format!(
            "{}{}{}\n{}\n",
            self.source_header_prefix, title, self.source_header_suffix, content
        )
    }

    /// Wraps instructions and packed blocks between the source delimiters.
    pub fn wrap_sources(&self, strict: bool, blocks: &[String]) -> String {
        format!(
            "{}\n\n{}\n{}\n{}\n",
            self.preamble(strict),
            self.begin_sources,
            blocks.join("\n"),
            self.end_sources
        )
    }

    /// Final user-facing prompt: fragment, question label and the literal query.
    /// An empty fragment sends the bare query.
    pub fn user_prompt(&self, fragment: &str, query: &str) -> String {
        if fragment.is_empty() {
            query.to_string()
        } else {
            format!("{}\n\n{}{}", fragment, self.question_label, query)
        }
    }
}

static ES: InstructionTemplates = InstructionTemplates {
    strict_preamble: "INSTRUCCIONES DE CONTEXTO ESTRICTO (IMPORTANTE):
1. Responde ÚNICAMENTE usando las 'FUENTES' de abajo.
2. ESTRUCTURA DE RESPUESTA OBLIGATORIA:
   - Primero: Un breve resumen en texto de lo encontrado.
   - Segundo: Una TABLA MARKDOWN detallada.
   - Tercero: Conclusiones breves.
3. REGLA DE ORO DE FILAS: Cada fila de datos del documento original debe corresponder a una fila en tu tabla de respuesta. No agrupes múltiples productos en una sola línea.
4. Si la fuente es un CSV, respeta estrictamente los \"saltos de línea\" (filas) originales en tu representación.
5. Si no hay información, responde: \"No tengo esa información en la base de datos.\"",
    hybrid_preamble: "INSTRUCCIONES DE CONTEXTO HÍBRIDO:
Utiliza la siguiente información de contexto para enriquecer tu respuesta.
FORMATO: Prioriza el uso de TABLAS MARKDOWN con filas claras para presentar listas de precios, inventario o datos estructurados.",
    source_header_prefix: "--- FUENTE: ",
    source_header_suffix: " ---",
    begin_sources: "=== COMIENZO DE FUENTES ===",
    end_sources: "=== FIN DE FUENTES ===",
    no_documents: "No hay documentos relevantes cargados o encontrados para esta consulta. Responde que no tienes información.",
    no_information: "No tengo esa información en la base de datos.",
    question_label: "PREGUNTA DEL USUARIO: ",
};

static EN: InstructionTemplates = InstructionTemplates {
    strict_preamble: "STRICT CONTEXT INSTRUCTIONS (IMPORTANT):
1. Answer ONLY using the 'SOURCES' below.
2. MANDATORY ANSWER STRUCTURE:
   - First: A brief text summary of what was found.
   - Second: A detailed MARKDOWN TABLE.
   - Third: Brief conclusions.
3. GOLDEN ROW RULE: Each data row of the original document must map to one row of your answer table. Never merge several products into a single line.
4. If the source is a CSV, strictly preserve its original line breaks (rows) in your output.
5. If there is no information, answer: \"I don't have that information in the database.\"",
    hybrid_preamble: "HYBRID CONTEXT INSTRUCTIONS:
Use the following context information to enrich your answer.
FORMAT: Prefer MARKDOWN TABLES with clear rows to present price lists, inventory or structured data.",
    source_header_prefix: "--- SOURCE: ",
    source_header_suffix: " ---",
    begin_sources: "=== BEGIN SOURCES ===",
    end_sources: "=== END SOURCES ===",
    no_documents: "No relevant documents were loaded or found for this query. Answer that you do not have that information.",
    no_information: "I don't have that information in the database.",
    question_label: "USER QUESTION: ",
};
