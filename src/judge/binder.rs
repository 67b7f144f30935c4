use serde::Deserialize;
use serde_json as json;

use super::JudgeError;
use super::value::{ParamType, Value};

/// Declarative function signature stored in a problem's `signature_json`.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionSignature {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub class_name: String,
    pub function_name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// One entry of a problem's `test_cases_json`.
#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    pub input: json::Map<String, json::Value>,
    pub output: json::Value,
}

/// A signature with its type strings resolved, ready to bind test cases.
#[derive(Debug, Clone)]
pub struct BoundSignature {
    pub class_name: String,
    pub function_name: String,
    pub params: Vec<(String, ParamType)>,
    pub return_ty: ParamType,
}

/// A test case translated into the concrete sandbox invocation: the stdin
/// payload carrying the ordered argument array, plus the coerced expected
/// output to compare against.
#[derive(Debug, Clone)]
pub struct BoundCase {
    pub stdin: String,
    pub expected: Value,
    pub input_echo: json::Value,
}

impl BoundSignature {
    pub fn compile(signature: &FunctionSignature) -> Result<Self, JudgeError> {
        if signature.function_name.trim().is_empty() {
            return Err(JudgeError::BadProblem(
                "signature has an empty function name".to_string(),
            ));
        }

        let mut params = Vec::with_capacity(signature.parameters.len());
        for p in &signature.parameters {
            params.push((p.name.clone(), ParamType::parse(&p.ty)?));
        }

        let class_name = if signature.class_name.trim().is_empty() {
            "Solution".to_string()
        } else {
            signature.class_name.clone()
        };

        Ok(Self {
            class_name,
            function_name: signature.function_name.clone(),
            params,
            return_ty: ParamType::parse(&signature.return_type)?,
        })
    }

    /// Bind one test case: check its input keys against the parameter list,
    /// coerce every argument and the expected output to the declared types,
    /// and serialize the arguments in declared order.
    pub fn bind(&self, case: &TestCase) -> Result<BoundCase, JudgeError> {
        if case.input.len() != self.params.len() {
            return Err(JudgeError::SignatureMismatch(format!(
                "test case has {} input(s), signature declares {} parameter(s)",
                case.input.len(),
                self.params.len()
            )));
        }

        let mut args = Vec::with_capacity(self.params.len());
        for (name, ty) in &self.params {
            let raw = case.input.get(name).ok_or_else(|| {
                JudgeError::SignatureMismatch(format!("missing input for parameter `{name}`"))
            })?;
            args.push(Value::coerce(ty, raw)?.to_json());
        }

        let expected = Value::coerce(&self.return_ty, &case.output)?;

        let mut stdin = json::Value::Array(args).to_string();
        stdin.push('\n');

        Ok(BoundCase {
            stdin,
            expected,
            input_echo: json::Value::Object(case.input.clone()),
        })
    }

    /// Produce the full program fed to the sandbox: the user's source followed
    /// by a harness that reads the argument array from stdin, invokes the
    /// declared method, and prints the JSON-encoded return value as the final
    /// line of stdout.
    pub fn harness_program(&self, user_source: &str) -> String {
        format!(
            r#"{source}

if __name__ == "__main__":
    import json as _json
    import sys as _sys
    _args = _json.load(_sys.stdin)
    _result = {class_name}().{function_name}(*_args)
    _sys.stdout.write("\n")
    _sys.stdout.write(_json.dumps(_result, separators=(",", ":")))
    _sys.stdout.write("\n")
"#,
            source = user_source,
            class_name = self.class_name,
            function_name = self.function_name,
        )
    }
}
