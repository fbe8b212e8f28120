use log::trace;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::trie::Trie;
use crate::config::EXECUTION_LIMIT;

/// Errors that abort a program run
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpreterError {
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("The 'PUSH' opcode cannot be last")]
    PushCannotBeLast,

    #[error("Check for an infinite loop. Execution limit of {0} exceeded")]
    ExecutionLimitExceeded(u64),

    #[error("Stack underflow at instruction {0}")]
    StackUnderflow(usize),
}

/// A code word or operand
///
/// Contract code is a flat list of these: opcodes are text words and the word
/// after a `PUSH` is its operand.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    Null,
}

impl Value {
    /// Truthiness used by `AND` and `OR`
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => !s.is_empty(),
            Value::Null => false,
        }
    }

    /// Numeric view of the value; text that is not a number becomes NaN
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Text(s) if s.trim().is_empty() => 0.0,
            Value::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
            Value::Null => 0.0,
        }
    }

    fn as_integral(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Some(*n as i64),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Integral numbers are written without a fraction, e.g. `2` not `2.0`
        match self {
            Value::Number(n) => match self.as_integral() {
                Some(integral) => serializer.serialize_i64(integral),
                None => serializer.serialize_f64(*n),
            },
            Value::Text(s) => serializer.serialize_str(s),
            Value::Null => serializer.serialize_unit(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) if n.is_nan() => write!(f, "NaN"),
            Value::Number(n) if n.is_infinite() => {
                write!(f, "{}", if *n > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Value::Number(n) if *n == 0.0 => write!(f, "0"),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e21 => write!(f, "{:.0}", n),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Null => Ok(()),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<OpCode> for Value {
    fn from(value: OpCode) -> Self {
        Value::Text(value.name().to_string())
    }
}

/// The instruction set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Stop,
    Add,
    Sub,
    Mul,
    Div,
    Push,
    Lt,
    Gt,
    Eq,
    And,
    Or,
    Jump,
    Jumpi,
    Store,
    Load,
}

impl OpCode {
    pub const ALL: [OpCode; 15] = [
        OpCode::Stop,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::Push,
        OpCode::Lt,
        OpCode::Gt,
        OpCode::Eq,
        OpCode::And,
        OpCode::Or,
        OpCode::Jump,
        OpCode::Jumpi,
        OpCode::Store,
        OpCode::Load,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Stop => "STOP",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Push => "PUSH",
            OpCode::Lt => "LT",
            OpCode::Gt => "GT",
            OpCode::Eq => "EQ",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Jump => "JUMP",
            OpCode::Jumpi => "JUMPI",
            OpCode::Store => "STORE",
            OpCode::Load => "LOAD",
        }
    }

    /// Gas charged every time the opcode executes
    pub fn gas_cost(self) -> u64 {
        match self {
            OpCode::Stop | OpCode::Push => 0,
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Lt
            | OpCode::Gt
            | OpCode::Eq
            | OpCode::And
            | OpCode::Or => 1,
            OpCode::Jump | OpCode::Jumpi => 2,
            OpCode::Store | OpCode::Load => 5,
        }
    }

    fn apply_binary(self, a: Value, b: Value) -> Value {
        let flag = |condition: bool| Value::Number(if condition { 1.0 } else { 0.0 });

        match self {
            OpCode::Add => match (&a, &b) {
                (Value::Text(_), _) | (_, Value::Text(_)) => Value::Text(format!("{}{}", a, b)),
                _ => Value::Number(a.to_number() + b.to_number()),
            },
            OpCode::Sub => Value::Number(a.to_number() - b.to_number()),
            OpCode::Mul => Value::Number(a.to_number() * b.to_number()),
            OpCode::Div => Value::Number(a.to_number() / b.to_number()),
            OpCode::Lt => flag(compare(&a, &b) == Some(Ordering::Less)),
            OpCode::Gt => flag(compare(&a, &b) == Some(Ordering::Greater)),
            OpCode::Eq => flag(a == b),
            OpCode::And => {
                if a.is_truthy() {
                    b
                } else {
                    a
                }
            }
            OpCode::Or => {
                if a.is_truthy() {
                    a
                } else {
                    b
                }
            }
            _ => Value::Null,
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        _ => a.to_number().partial_cmp(&b.to_number()),
    }
}

impl FromStr for OpCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpCode::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| format!("unknown opcode {}", s))
    }
}

/// Outcome of a completed program run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// Top of the stack when the program halted
    pub result: Option<Value>,

    #[serde(rename = "gasUsed")]
    pub gas_used: u64,
}

/// Stack machine that runs account code against a storage trie
pub struct Interpreter<'a> {
    program_counter: usize,
    stack: Vec<Value>,
    execution_count: u64,
    storage_trie: &'a mut Trie<Value>,
}

impl<'a> Interpreter<'a> {
    pub fn new(storage_trie: &'a mut Trie<Value>) -> Self {
        Interpreter {
            program_counter: 0,
            stack: Vec::new(),
            execution_count: 0,
            storage_trie,
        }
    }

    fn pop(&mut self) -> Result<Value, InterpreterError> {
        self.stack
            .pop()
            .ok_or(InterpreterError::StackUnderflow(self.program_counter))
    }

    fn jump(&mut self, code_length: usize) -> Result<(), InterpreterError> {
        let destination = self.pop()?;

        match destination.as_integral() {
            Some(index) if index >= 0 && index as usize <= code_length => {
                self.program_counter = index as usize;
                Ok(())
            }
            _ => Err(InterpreterError::InvalidDestination(destination.to_string())),
        }
    }

    fn finish(&self, gas_used: u64) -> ExecutionResult {
        ExecutionResult {
            result: self.stack.last().cloned(),
            gas_used,
        }
    }

    /// Runs `code` until `STOP` or the end of the code
    ///
    /// # Returns
    ///
    /// The final top of the stack and the gas consumed
    pub fn run_code(&mut self, code: &[Value]) -> Result<ExecutionResult, InterpreterError> {
        let mut gas_used = 0;

        while self.program_counter < code.len() {
            self.execution_count += 1;
            if self.execution_count > EXECUTION_LIMIT {
                return Err(InterpreterError::ExecutionLimitExceeded(EXECUTION_LIMIT));
            }

            let opcode = match &code[self.program_counter] {
                Value::Text(word) => word.parse::<OpCode>().ok(),
                _ => None,
            };

            // Stray operands are skipped
            let Some(opcode) = opcode else {
                self.program_counter += 1;
                continue;
            };

            gas_used += opcode.gas_cost();

            match opcode {
                OpCode::Stop => {
                    trace!("STOP at {} after {} steps", self.program_counter, self.execution_count);
                    return Ok(self.finish(gas_used));
                }
                OpCode::Push => {
                    self.program_counter += 1;
                    if self.program_counter == code.len() {
                        return Err(InterpreterError::PushCannotBeLast);
                    }
                    self.stack.push(code[self.program_counter].clone());
                }
                OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Lt
                | OpCode::Gt
                | OpCode::Eq
                | OpCode::And
                | OpCode::Or => {
                    let a = self.pop()?;
                    let b = self.pop()?;
                    self.stack.push(opcode.apply_binary(a, b));
                }
                OpCode::Jump => {
                    self.jump(code.len())?;
                    continue;
                }
                OpCode::Jumpi => {
                    let condition = self.pop()?;
                    if condition == Value::Number(1.0) {
                        self.jump(code.len())?;
                        continue;
                    }
                }
                OpCode::Store => {
                    let key = self.pop()?;
                    let value = self.pop()?;
                    self.storage_trie.put(&key.to_string(), value);
                }
                OpCode::Load => {
                    let key = self.pop()?;
                    let value = self.storage_trie.get(&key.to_string()).unwrap_or(Value::Null);
                    self.stack.push(value);
                }
            }

            self.program_counter += 1;
        }

        Ok(self.finish(gas_used))
    }
}
