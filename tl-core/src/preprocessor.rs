//! Virtual-index expansion (§4.4.11): rewrites equations whose indices
//! mention a logical time axis (`*t`, `*t+1`, `*t-1`) into a sequence of
//! ordinary, timestep-scheduled equations the executor registry can run
//! unchanged. Runs once, before any equation reaches the registry.
//!
//! Tensors keep a single slot for their virtual axis throughout execution
//! ("Mode B"): a producer's current value always lives at index `0`.
//! Each timestep writes into a fresh SSA temporary first, so equations
//! computed in the same timestep observe each other's just-written
//! values, then copies the temporary back into the main tensor's slot 0.

use crate::ast::*;
use crate::env::Environment;
use crate::error::TLError;
use crate::executor::Registry;
use crate::tensor::{Tensor, TensorBackend};
use crate::Result;
use std::collections::{HashMap, HashSet};

/// Default timestep count when no driving tensor axis can be found.
const DEFAULT_TIMESTEPS: i64 = 10;

enum Classification {
    Producer { driving_name: String, offset: i64 },
    Consumer { driving_name: String },
    NonVirtual,
}

enum Role {
    Producer(i64),
    Consumer,
}

struct Member {
    eq: TensorEquation,
    role: Role,
}

/// Expand every virtual-indexed equation in `program`, returning a new
/// program with non-virtual statements preserved verbatim and tensor
/// queries over virtual indices rewritten to read slot 0.
///
/// Classification runs before any statement executes, but a driving
/// axis's length (`driving_length`) is read off an already-bound
/// tensor's shape — which for a tensor defined earlier in the same
/// program (e.g. `data = [...]` before `avg[*t+1] = ... data[t]`) does
/// not exist yet. To make that shape available, non-virtual equations
/// using the idempotent `=` projection are executed here, in program
/// order, as they're classified; the real run walks the same equations
/// again afterwards and re-binds the identical value. Accumulating
/// projections (`+=`, `avg=`, `max=`, `min=`) are not safe to repeat
/// and are left for the real run, so they cannot serve as a driving
/// axis's length source.
pub fn expand(program: &Program, env: &mut Environment, backend: &dyn TensorBackend) -> Result<Program> {
    let registry = Registry::standard();
    let mut classifications = Vec::with_capacity(program.statements.len());
    for stmt in &program.statements {
        classifications.push(match stmt {
            Statement::TensorEquation(eq) => {
                let classification = classify(eq)?;
                if matches!(classification, Classification::NonVirtual) && eq.projection == Projection::Assign {
                    registry.run(eq, env, backend)?;
                }
                Some(classification)
            }
            _ => None,
        });
    }

    let mut groups: HashMap<String, Vec<Member>> = HashMap::new();
    let mut group_of: HashMap<usize, String> = HashMap::new();
    for (i, stmt) in program.statements.iter().enumerate() {
        let Statement::TensorEquation(eq) = stmt else { continue };
        match &classifications[i] {
            Some(Classification::Producer { driving_name, offset }) => {
                groups.entry(driving_name.clone()).or_default().push(Member {
                    eq: eq.clone(),
                    role: Role::Producer(*offset),
                });
                group_of.insert(i, driving_name.clone());
            }
            Some(Classification::Consumer { driving_name }) => {
                groups.entry(driving_name.clone()).or_default().push(Member {
                    eq: eq.clone(),
                    role: Role::Consumer,
                });
                group_of.insert(i, driving_name.clone());
            }
            _ => {}
        }
    }

    let mut expansions: HashMap<String, Vec<Statement>> = HashMap::new();
    for (name, members) in groups {
        let stmts = expand_group(members, &name, env)?;
        expansions.insert(name, stmts);
    }

    let mut emitted = HashSet::new();
    let mut out = Vec::with_capacity(program.statements.len());
    for (i, stmt) in program.statements.iter().enumerate() {
        if let Some(name) = group_of.get(&i) {
            if emitted.insert(name.clone()) {
                out.extend(expansions.remove(name).expect("group expansion computed above"));
            }
            continue;
        }
        out.push(rewrite_query_if_virtual(stmt));
    }
    Ok(Program { statements: out })
}

fn classify(eq: &TensorEquation) -> Result<Classification> {
    let lhs_virtuals: Vec<(&Identifier, i64)> = eq
        .lhs
        .indices
        .iter()
        .filter_map(|pos| match pos {
            IndexOrSlice::Index(Index { kind: IndexKind::Virtual { name, offset }, .. }) => Some((name, *offset)),
            _ => None,
        })
        .collect();
    if lhs_virtuals.len() > 1 {
        return Err(TLError::parse(
            eq.loc,
            "a tensor equation's left-hand side may carry at most one virtual index".to_string(),
        ));
    }
    if let Some((name, offset)) = lhs_virtuals.first() {
        return Ok(Classification::Producer { driving_name: name.as_str().to_string(), offset: *offset });
    }
    let mut names = Vec::new();
    for clause in &eq.clauses {
        collect_virtual_names(&clause.expr, &mut names);
        if let Some(guard) = &clause.guard {
            collect_virtual_names(guard, &mut names);
        }
    }
    match names.into_iter().next() {
        Some(driving_name) => Ok(Classification::Consumer { driving_name }),
        None => Ok(Classification::NonVirtual),
    }
}

fn collect_virtual_names(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::TensorRef(tref) => {
            for pos in &tref.indices {
                if let IndexOrSlice::Index(Index { kind: IndexKind::Virtual { name, .. }, .. }) = pos {
                    out.push(name.as_str().to_string());
                }
            }
        }
        Expr::List(items, _) => items.iter().for_each(|i| collect_virtual_names(i, out)),
        Expr::Call { args, .. } => args.iter().for_each(|a| collect_virtual_names(a, out)),
        Expr::Binary { lhs, rhs, .. } => {
            collect_virtual_names(lhs, out);
            collect_virtual_names(rhs, out);
        }
        Expr::Unary { expr, .. } => collect_virtual_names(expr, out),
        Expr::Number(_) | Expr::Str(_) => {}
    }
}

fn collect_tensor_refs<'a>(expr: &'a Expr, out: &mut Vec<&'a TensorRef>) {
    match expr {
        Expr::TensorRef(tref) => out.push(tref),
        Expr::List(items, _) => items.iter().for_each(|i| collect_tensor_refs(i, out)),
        Expr::Call { args, .. } => args.iter().for_each(|a| collect_tensor_refs(a, out)),
        Expr::Binary { lhs, rhs, .. } => {
            collect_tensor_refs(lhs, out);
            collect_tensor_refs(rhs, out);
        }
        Expr::Unary { expr, .. } => collect_tensor_refs(expr, out),
        Expr::Number(_) | Expr::Str(_) => {}
    }
}

fn clause_tensor_refs(clauses: &[GuardedClause]) -> Vec<&TensorRef> {
    let mut out = Vec::new();
    for c in clauses {
        collect_tensor_refs(&c.expr, &mut out);
        if let Some(g) = &c.guard {
            collect_tensor_refs(g, &mut out);
        }
    }
    out
}

/// `i` depends on nothing; `j` depends on `i` when `j`'s body mentions
/// the tensor `i` writes, at any offset (self-edges are never added: a
/// producer reading its own previous value is normal recurrence, not an
/// ordering dependency).
fn topo_sort(members: &[Member], loc: SourceLocation) -> Result<Vec<usize>> {
    let n = members.len();
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];
    for j in 0..n {
        let referenced: HashSet<&str> = clause_tensor_refs(&members[j].eq.clauses)
            .into_iter()
            .map(|r| r.name.as_str())
            .collect();
        for i in 0..n {
            if i != j && referenced.contains(members[i].eq.lhs.name.as_str()) {
                edges[i].push(j);
                indegree[j] += 1;
            }
        }
    }
    let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while !ready.is_empty() {
        ready.sort_unstable();
        let node = ready.remove(0);
        order.push(node);
        for &next in &edges[node] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(next);
            }
        }
    }
    if order.len() != n {
        return Err(TLError::Cyclic(format!(
            "cyclic dependency among virtual-indexed equations near {loc}"
        )));
    }
    Ok(order)
}

fn driving_length(members: &[Member], driving_name: &str, env: &Environment) -> i64 {
    for m in members {
        for tref in clause_tensor_refs(&m.eq.clauses) {
            for (pos, idx) in tref.indices.iter().enumerate() {
                let IndexOrSlice::Index(Index { kind: IndexKind::Named { name, divisor: None }, .. }) = idx else {
                    continue;
                };
                if name.as_str() != driving_name {
                    continue;
                }
                if let Some(tensor) = env.try_lookup(tref.name.as_str()) {
                    if let Some(&len) = tensor.shape.get(pos) {
                        return len as i64;
                    }
                }
            }
        }
    }
    DEFAULT_TIMESTEPS
}

fn substitute_index_list(indices: &[IndexOrSlice], driving_name: &str, t: i64) -> Vec<IndexOrSlice> {
    indices
        .iter()
        .map(|pos| match pos {
            IndexOrSlice::Index(idx) => {
                let mut idx = idx.clone();
                match &idx.kind {
                    IndexKind::Virtual { name, .. } if name.as_str() == driving_name => {
                        idx.kind = IndexKind::Numeric(0);
                    }
                    IndexKind::Named { name, divisor: None } if name.as_str() == driving_name => {
                        idx.kind = IndexKind::Numeric(t);
                    }
                    _ => {}
                }
                IndexOrSlice::Index(idx)
            }
            other => other.clone(),
        })
        .collect()
}

/// Rewrite one tensor reference's indices, redirecting to a producer's
/// same-timestep SSA temporary when this reference reads that producer's
/// tensor at exactly the offset the producer writes.
fn rewrite_tensor_ref(tref: &TensorRef, driving_name: &str, t: i64, temp_for: &HashMap<String, (String, i64)>) -> TensorRef {
    let mut name = tref.name.clone();
    if let Some((temp_name, producer_offset)) = temp_for.get(tref.name.as_str()) {
        let reads_same_offset = tref.indices.iter().any(|pos| {
            matches!(pos, IndexOrSlice::Index(Index { kind: IndexKind::Virtual { name: n, offset }, .. })
                if n.as_str() == driving_name && offset == producer_offset)
        });
        if reads_same_offset {
            name = Identifier::from(temp_name.as_str());
        }
    }
    TensorRef {
        name,
        indices: substitute_index_list(&tref.indices, driving_name, t),
        loc: tref.loc,
    }
}

fn rewrite_expr(expr: &Expr, driving_name: &str, t: i64, temp_for: &HashMap<String, (String, i64)>) -> Expr {
    match expr {
        Expr::TensorRef(tref) => Expr::TensorRef(rewrite_tensor_ref(tref, driving_name, t, temp_for)),
        Expr::Number(n) => Expr::Number(n.clone()),
        Expr::Str(s) => Expr::Str(s.clone()),
        Expr::List(items, loc) => Expr::List(
            items.iter().map(|i| rewrite_expr(i, driving_name, t, temp_for)).collect(),
            *loc,
        ),
        Expr::Call { name, args, loc } => Expr::Call {
            name: name.clone(),
            args: args.iter().map(|a| rewrite_expr(a, driving_name, t, temp_for)).collect(),
            loc: *loc,
        },
        Expr::Binary { op, lhs, rhs, loc } => Expr::Binary {
            op: *op,
            lhs: Box::new(rewrite_expr(lhs, driving_name, t, temp_for)),
            rhs: Box::new(rewrite_expr(rhs, driving_name, t, temp_for)),
            loc: *loc,
        },
        Expr::Unary { op, expr, loc } => Expr::Unary {
            op: *op,
            expr: Box::new(rewrite_expr(expr, driving_name, t, temp_for)),
            loc: *loc,
        },
    }
}

fn rewrite_clauses(clauses: &[GuardedClause], driving_name: &str, t: i64, temp_for: &HashMap<String, (String, i64)>) -> Vec<GuardedClause> {
    clauses
        .iter()
        .map(|c| GuardedClause {
            expr: rewrite_expr(&c.expr, driving_name, t, temp_for),
            guard: c.guard.as_ref().map(|g| rewrite_expr(g, driving_name, t, temp_for)),
        })
        .collect()
}

fn expand_group(members: Vec<Member>, driving_name: &str, env: &mut Environment) -> Result<Vec<Statement>> {
    let loc = members[0].eq.loc;
    let order = topo_sort(&members, loc)?;
    let timesteps = driving_length(&members, driving_name, env);

    for m in &members {
        if matches!(m.role, Role::Producer(_)) && !env.has(m.eq.lhs.name.as_str()) {
            env.bind(m.eq.lhs.name.as_str(), Tensor::scalar(0.0));
        }
    }

    let mut out = Vec::new();
    for t in 0..timesteps {
        let temp_for: HashMap<String, (String, i64)> = members
            .iter()
            .filter_map(|m| match m.role {
                Role::Producer(offset) => Some((
                    m.eq.lhs.name.as_str().to_string(),
                    (format!("{}_next_{t}", m.eq.lhs.name.as_str()), offset),
                )),
                Role::Consumer => None,
            })
            .collect();

        let mut copybacks = Vec::with_capacity(members.len());
        for &idx in &order {
            let m = &members[idx];
            let clauses = rewrite_clauses(&m.eq.clauses, driving_name, t, &temp_for);
            match m.role {
                Role::Producer(_) => {
                    let (temp_name, _) = &temp_for[m.eq.lhs.name.as_str()];
                    let temp_lhs = TensorRef {
                        name: Identifier::from(temp_name.as_str()),
                        indices: substitute_index_list(&m.eq.lhs.indices, driving_name, t),
                        loc: m.eq.lhs.loc,
                    };
                    out.push(Statement::TensorEquation(TensorEquation {
                        lhs: temp_lhs.clone(),
                        projection: m.eq.projection,
                        clauses,
                        loc: m.eq.loc,
                    }));
                    let main_lhs = TensorRef {
                        name: m.eq.lhs.name.clone(),
                        indices: substitute_index_list(&m.eq.lhs.indices, driving_name, t),
                        loc: m.eq.lhs.loc,
                    };
                    copybacks.push(Statement::TensorEquation(TensorEquation {
                        lhs: main_lhs,
                        projection: Projection::Assign,
                        clauses: vec![GuardedClause { expr: Expr::TensorRef(temp_lhs), guard: None }],
                        loc: m.eq.loc,
                    }));
                }
                Role::Consumer => {
                    let lhs = TensorRef {
                        name: m.eq.lhs.name.clone(),
                        indices: substitute_index_list(&m.eq.lhs.indices, driving_name, t),
                        loc: m.eq.lhs.loc,
                    };
                    out.push(Statement::TensorEquation(TensorEquation {
                        lhs,
                        projection: m.eq.projection,
                        clauses,
                        loc: m.eq.loc,
                    }));
                }
            }
        }
        out.extend(copybacks);
    }
    Ok(out)
}

fn rewrite_query_if_virtual(stmt: &Statement) -> Statement {
    if let Statement::Query(q) = stmt {
        if let QueryTarget::Tensor(tref) = &q.target {
            let has_virtual = tref
                .indices
                .iter()
                .any(|pos| matches!(pos, IndexOrSlice::Index(Index { kind: IndexKind::Virtual { .. }, .. })));
            if has_virtual {
                let mut new_tref = tref.clone();
                for pos in new_tref.indices.iter_mut() {
                    if let IndexOrSlice::Index(idx) = pos {
                        if matches!(idx.kind, IndexKind::Virtual { .. }) {
                            idx.kind = IndexKind::Numeric(0);
                        }
                    }
                }
                return Statement::Query(Query {
                    target: QueryTarget::Tensor(new_tref),
                    body: q.body.clone(),
                    directive: q.directive.clone(),
                    loc: q.loc,
                });
            }
        }
    }
    stmt.clone()
}
