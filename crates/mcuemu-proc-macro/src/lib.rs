//! The `op_def!` statement DSL.
//!
//! `op_def!(ctx { ... })` rewrites a block written in terms of CPU registers
//! and memory spaces into calls to three macros that must be in scope at the
//! expansion site:
//!
//!  - `op_def_read!(ctx, REG)` / `op_def_read!(ctx, SPACE, index)`
//!  - `op_def_write!(ctx, REG, value)` / `op_def_write!(ctx, SPACE, index, value)`
//!  - `op_def_call!(ctx, INTRINSIC(args...))`
//!
//! Compound assignments are desugared to a read, the operator on a
//! temporary, and a write. Tuple assignments evaluate the right-hand side
//! once and assign each element in order.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{
    Expr, ExprAssign, ExprBinary, ExprBlock, ExprCall, ExprField, ExprIf, ExprLet, ExprLit,
    ExprMethodCall, ExprParen, ExprPath, ExprTuple, ExprUnary, Local, Path, PathArguments,
    PathSegment, Token, punctuated::Punctuated, spanned::Spanned,
};

/// Registers, read and written by name.
const REGISTERS: &[&str] = &["A", "B", "PC", "DPTR", "C", "OV", "AC"];

/// Memory spaces, read and written through `SPACE[index]`.
const SPACES: &[&str] = &[
    "BIT", "LBIT", "CODE", "XDATA", "DATA", "LDATA", "IDATA", "R",
];

/// Calls handed to the core rather than evaluated as Rust.
const INTRINSICS: &[&str] = &["POP", "POP16", "PUSH", "PUSH16", "RETI_DONE", "SEXT", "PAGE"];

type Output = syn::Result<proc_macro2::TokenStream>;

/// Desugars and transforms a block of statements into a sequence of
/// op_def_read/op_def_write calls.
#[proc_macro]
pub fn op_def(input: TokenStream) -> TokenStream {
    expand(input.into()).unwrap_or_else(|err| err.to_compile_error()).into()
}

fn expand(input: proc_macro2::TokenStream) -> Output {
    let mut input = input.into_iter();
    let context = input
        .next()
        .ok_or_else(|| syn::Error::new(Span::call_site(), "expected the context identifier"))?;
    let context: syn::Ident = syn::parse2(context.into())?;
    let block: syn::Block = syn::parse2(input.collect())?;

    let stmts = block
        .stmts
        .iter()
        .map(|stmt| transform_stmt(&context, stmt))
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(quote! {
        #(#stmts)*
    })
}

fn reserved(ident: &syn::Ident, names: &[&str]) -> bool {
    names.iter().any(|name| ident == name)
}

fn transform_block(context: &syn::Ident, block: &syn::Block) -> Output {
    let stmts = block
        .stmts
        .iter()
        .map(|stmt| transform_stmt(context, stmt))
        .collect::<syn::Result<Vec<_>>>()?;
    Ok(quote! {
        {
            #(#stmts)*
        }
    })
}

fn transform_stmt(context: &syn::Ident, stmt: &syn::Stmt) -> Output {
    match stmt {
        syn::Stmt::Expr(expr, semi) => {
            let transformed = transform_expr(context, expr)?;
            Ok(quote!(#transformed #semi))
        }
        syn::Stmt::Local(Local {
            let_token,
            attrs,
            pat,
            init,
            semi_token,
        }) => match init {
            Some(init) => {
                if let Some((else_token, _)) = &init.diverge {
                    return Err(syn::Error::new(
                        else_token.span(),
                        "let-else is not supported in op bodies",
                    ));
                }
                let init = transform_expr(context, &init.expr)?;
                Ok(quote! { #(#attrs)* #let_token #pat = #init #semi_token })
            }
            None => Ok(quote! { #(#attrs)* #let_token #pat #semi_token }),
        },
        other => Ok(quote! { #other }),
    }
}

fn path_expr(ident: &syn::Ident) -> Expr {
    Expr::Path(ExprPath {
        attrs: vec![],
        qself: None,
        path: ident_to_path(ident),
    })
}

fn transform_assign(context: &syn::Ident, left: &Expr, right: &Expr) -> Output {
    let right = transform_expr(context, right)?;
    match left {
        Expr::Path(path) => match path.path.get_ident() {
            Some(ident) if reserved(ident, REGISTERS) => {
                Ok(quote! { op_def_write!(#context, #ident, #right); })
            }
            _ => Ok(quote! { #left = #right; }),
        },
        Expr::Index(index_expr) => {
            let index = transform_expr(context, &index_expr.index)?;
            if let Expr::Path(path) = &*index_expr.expr
                && let Some(ident) = path.path.get_ident()
                && reserved(ident, SPACES)
            {
                return Ok(quote! {{
                    let index = #index;
                    let value = #right;
                    op_def_write!(#context, #ident, index, value);
                }});
            }
            let left = transform_expr(context, left)?;
            Ok(quote! { #left = #right; })
        }
        Expr::Tuple(ExprTuple { elems, .. }) => {
            let tmp = syn::Ident::new("tmp", Span::call_site());
            let assigns = elems
                .iter()
                .enumerate()
                .map(|(i, element)| {
                    let field = Expr::Field(ExprField {
                        attrs: vec![],
                        base: Box::new(path_expr(&tmp)),
                        dot_token: Token![.](Span::call_site()),
                        member: syn::Member::Unnamed(syn::Index::from(i)),
                    });
                    transform_assign_expr(context, element, field)
                })
                .collect::<syn::Result<Vec<_>>>()?;
            Ok(quote! { {
                let #tmp = #right;
                #(#assigns;)*
            } })
        }
        other => Err(syn::Error::new(
            other.span(),
            "unsupported assignment target",
        )),
    }
}

/// Assign an already-built (untransformed) right-hand expression.
fn transform_assign_expr(context: &syn::Ident, left: &Expr, right: Expr) -> Output {
    transform_expr(
        context,
        &Expr::Assign(ExprAssign {
            attrs: vec![],
            left: Box::new(left.clone()),
            eq_token: Token![=](Span::call_site()),
            right: Box::new(right),
        }),
    )
}

fn transform_expr(context: &syn::Ident, expr: &Expr) -> Output {
    match expr {
        Expr::Block(ExprBlock { block, .. }) => transform_block(context, block),
        Expr::Let(ExprLet { pat, expr, .. }) => {
            let init = transform_expr(context, expr)?;
            Ok(quote! { let #pat = #init; })
        }
        Expr::Tuple(ExprTuple { elems, .. }) => {
            let elems = elems
                .iter()
                .map(|arg| transform_expr(context, arg))
                .collect::<syn::Result<Vec<_>>>()?;
            Ok(quote! { (#(#elems),*) })
        }
        Expr::Assign(ExprAssign { left, right, .. }) => transform_assign(context, left, right),
        Expr::Unary(ExprUnary { op, expr, .. }) => {
            let expr = transform_expr(context, expr)?;
            Ok(quote! { #op #expr })
        }
        Expr::Binary(ExprBinary {
            left, op, right, ..
        }) => {
            use syn::BinOp::*;
            let transformed_left = transform_expr(context, left)?;
            let transformed_right = transform_expr(context, right)?;
            match op {
                AddAssign(..) | SubAssign(..) | MulAssign(..) | DivAssign(..) | RemAssign(..)
                | ShlAssign(..) | ShrAssign(..) | BitAndAssign(..) | BitOrAssign(..)
                | BitXorAssign(..) => {
                    let tmp = syn::Ident::new("tmp", Span::call_site());
                    let assign = transform_assign_expr(context, left, path_expr(&tmp))?;
                    Ok(quote! {{
                        let mut tmp = #transformed_left;
                        tmp #op #transformed_right;
                        #assign;
                    }})
                }
                _ => Ok(quote! { #transformed_left #op #transformed_right }),
            }
        }
        Expr::Call(ExprCall { func, args, .. }) => {
            let args = args
                .iter()
                .map(|arg| transform_expr(context, arg))
                .collect::<syn::Result<Vec<_>>>()?;

            if let Expr::Path(ExprPath { path, .. }) = &**func
                && let Some(ident) = path.get_ident()
                && reserved(ident, INTRINSICS)
            {
                return Ok(quote! { op_def_call!(#context, #ident (#(#args),*)) });
            }

            let func = transform_expr(context, func)?;
            Ok(quote! { #func(#(#args),*) })
        }
        Expr::Paren(ExprParen { expr, .. }) => {
            let expr = transform_expr(context, expr)?;
            Ok(quote! { (#expr) })
        }
        Expr::MethodCall(ExprMethodCall {
            receiver,
            method,
            args,
            turbofish,
            ..
        }) => {
            if let Some(turbofish) = turbofish {
                return Err(syn::Error::new(
                    turbofish.span(),
                    "turbofish is not supported in op bodies",
                ));
            }
            let receiver = transform_expr(context, receiver)?;
            let args = args
                .iter()
                .map(|arg| transform_expr(context, arg))
                .collect::<syn::Result<Vec<_>>>()?;
            Ok(quote! { #receiver.#method(#(#args),*) })
        }
        Expr::Field(ExprField { base, member, .. }) => {
            let base = transform_expr(context, base)?;
            Ok(quote! { #base.#member })
        }
        Expr::Path(path) => match path.path.get_ident() {
            Some(ident) if reserved(ident, REGISTERS) => {
                Ok(quote! { op_def_read!(#context, #ident) })
            }
            _ => Ok(quote! { #expr }),
        },
        Expr::Index(index_expr) => {
            if let Expr::Path(path) = &*index_expr.expr
                && let Some(ident) = path.path.get_ident()
                && reserved(ident, SPACES)
            {
                let index = transform_expr(context, &index_expr.index)?;
                return Ok(quote! { op_def_read!(#context, #ident, #index) });
            }
            Ok(quote! { #expr })
        }
        Expr::If(ExprIf {
            cond,
            then_branch,
            else_branch,
            ..
        }) => {
            let cond = transform_expr(context, cond)?;
            let then_branch = transform_block(context, then_branch)?;
            match else_branch {
                Some((_, otherwise)) => {
                    let otherwise = transform_expr(context, otherwise)?;
                    Ok(quote! { if #cond #then_branch else #otherwise })
                }
                None => Ok(quote! { if #cond #then_branch }),
            }
        }
        Expr::Lit(ExprLit { lit, .. }) => Ok(quote! { #lit }),
        other => Err(syn::Error::new(
            other.span(),
            "unsupported expression in op body",
        )),
    }
}

fn ident_to_path(ident: &syn::Ident) -> Path {
    Path {
        leading_colon: None,
        segments: Punctuated::from_iter(vec![PathSegment {
            ident: ident.clone(),
            arguments: PathArguments::None,
        }]),
    }
}
