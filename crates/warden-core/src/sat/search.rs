use crate::{
    sat::encode::{Domain, Formula, Operand, Var},
    value::{Value, eval_compare},
};

///
/// Outcome
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Outcome {
    Satisfiable,
    Unsatisfiable,
    /// Step budget ran out before the search finished.
    Exhausted,
}

/// Candidate values for one variable. Constants the variable is compared
/// with split its domain into regions; one representative per region is
/// enough to decide every comparison in the formula.
pub(super) fn candidates(var: &Var) -> Vec<Value> {
    let mut out: Vec<Value> = match &var.domain {
        Domain::Fixed(value) => return vec![value.clone()],
        Domain::Bool => vec![Value::Bool(true), Value::Bool(false)],
        Domain::Enum(variants) => variants.iter().map(|v| Value::Text(v.clone())).collect(),
        Domain::Int => int_candidates(&var.constants),
        Domain::Float => float_candidates(&var.constants),
        Domain::Text => text_candidates(&var.constants),
    };
    if var.nullable {
        out.push(Value::Null);
    }

    out
}

#[expect(clippy::cast_possible_truncation)]
fn int_candidates(constants: &[Value]) -> Vec<Value> {
    let mut ints = vec![0_i64];
    for constant in constants {
        let (lo, hi) = match constant {
            Value::Int(i) => (*i, *i),
            // saturating float → int casts
            Value::Float(x) if x.is_finite() => (x.floor() as i64, x.ceil() as i64),
            _ => continue,
        };
        ints.extend([lo.saturating_sub(1), lo, hi, hi.saturating_add(1)]);
    }
    ints.sort_unstable();
    ints.dedup();

    ints.into_iter().map(Value::Int).collect()
}

fn float_candidates(constants: &[Value]) -> Vec<Value> {
    let mut points: Vec<f64> = constants
        .iter()
        .filter_map(Value::as_f64)
        .filter(|x| x.is_finite())
        .collect();
    points.sort_by(f64::total_cmp);
    points.dedup();

    let mut out = vec![0.0];
    for (i, x) in points.iter().enumerate() {
        out.extend([x - 1.0, *x, x + 1.0]);
        if let Some(next) = points.get(i + 1) {
            out.push(x + (next - x) / 2.0);
        }
    }
    out.sort_by(f64::total_cmp);
    out.dedup();

    out.into_iter().map(Value::Float).collect()
}

fn text_candidates(constants: &[Value]) -> Vec<Value> {
    let mut texts: Vec<String> = constants
        .iter()
        .filter_map(|c| c.as_text().map(str::to_string))
        .collect();
    texts.sort();
    texts.dedup();

    // `c + "\0"` is the immediate successor of `c`, so it lies in the gap
    // above each constant whenever that gap is non-empty
    let mut out: Vec<Value> = Vec::with_capacity(texts.len() * 2 + 1);
    if texts.first().is_none_or(|first| !first.is_empty()) {
        out.push(Value::Text(String::new()));
    }
    for text in texts {
        out.push(Value::Text(format!("{text}\0")));
        out.push(Value::Text(text));
    }

    out
}

///
/// Search
/// Depth-first assignment with three-valued pruning.
///

pub(super) struct Search<'a> {
    formula: &'a Formula,
    domains: Vec<Vec<Value>>,
    assignment: Vec<Option<Value>>,
    steps: u64,
    max_steps: u64,
}

impl<'a> Search<'a> {
    pub(super) fn new(formula: &'a Formula, vars: &[Var], max_steps: u64) -> Self {
        Self {
            formula,
            domains: vars.iter().map(candidates).collect(),
            assignment: vec![None; vars.len()],
            steps: 0,
            max_steps,
        }
    }

    pub(super) fn run(mut self) -> Outcome {
        self.solve(0)
    }

    fn solve(&mut self, depth: usize) -> Outcome {
        match eval(self.formula, &self.assignment) {
            Some(true) => return Outcome::Satisfiable,
            Some(false) => return Outcome::Unsatisfiable,
            None if depth >= self.assignment.len() => return Outcome::Unsatisfiable,
            None => {}
        }

        for i in 0..self.domains[depth].len() {
            self.steps += 1;
            if self.steps > self.max_steps {
                return Outcome::Exhausted;
            }

            self.assignment[depth] = Some(self.domains[depth][i].clone());
            match self.solve(depth + 1) {
                Outcome::Unsatisfiable => {}
                other => return other,
            }
        }
        self.assignment[depth] = None;

        Outcome::Unsatisfiable
    }
}

/// Three-valued evaluation; `None` while an involved variable is unassigned.
pub(super) fn eval(formula: &Formula, assignment: &[Option<Value>]) -> Option<bool> {
    match formula {
        Formula::Const(b) => Some(*b),
        Formula::And(items) => {
            let mut unknown = false;
            for item in items {
                match eval(item, assignment) {
                    Some(false) => return Some(false),
                    Some(true) => {}
                    None => unknown = true,
                }
            }
            (!unknown).then_some(true)
        }
        Formula::Or(items) => {
            let mut unknown = false;
            for item in items {
                match eval(item, assignment) {
                    Some(true) => return Some(true),
                    Some(false) => {}
                    None => unknown = true,
                }
            }
            (!unknown).then_some(false)
        }
        Formula::Not(inner) => eval(inner, assignment).map(|b| !b),
        Formula::Compare { left, op, right } => {
            let left = operand(left, assignment)?;
            let right = operand(right, assignment)?;
            Some(eval_compare(*op, left, right))
        }
    }
}

fn operand<'v>(operand: &'v Operand, assignment: &'v [Option<Value>]) -> Option<&'v Value> {
    match operand {
        Operand::Const(value) => Some(value),
        Operand::Var(id) => assignment.get(*id).and_then(Option::as_ref),
    }
}
