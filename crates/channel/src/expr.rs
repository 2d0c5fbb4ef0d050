//! Typed runtime expressions.
//!
//! Each variant renders to a single GNU statement-expression against the
//! Objective-C runtime API. Aggregate-producing variants allocate one
//! count-prefixed buffer in the target and evaluate to its address; the
//! record layouts are defined in [`crate::layout`].

use std::fmt;

use objscope_primitives::EntityHandle;

use crate::layout::{ENTITY_RECORD_SIZE, IVAR_ENTRY_SIZE, METHOD_ENTRY_SIZE, PROPERTY_ENTRY_SIZE};

/// An expression the engine asks the target to evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
	/// Every class registered with the runtime (`objc_copyClassList`).
	ClassList,
	/// Name, superclass, metaclass flag and protocols for a window of handles.
	ResolveWindow { handles: Vec<EntityHandle> },
	/// The same record as [`Expr::ResolveWindow`], for one class looked up by name.
	ResolveNamed { name: String },
	/// Methods, class methods, ivars and properties of one class.
	MemberTable { handle: EntityHandle },
	/// Class, selector, lookup class and IMP for one method.
	MethodImplementation {
		class_name: String,
		selector: String,
		class_method: bool,
	},
}

/// Discriminant of [`Expr`], used for accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExprKind {
	ClassList,
	ResolveWindow,
	ResolveNamed,
	MemberTable,
	MethodImplementation,
}

impl Expr {
	pub fn kind(&self) -> ExprKind {
		match self {
			Expr::ClassList => ExprKind::ClassList,
			Expr::ResolveWindow { .. } => ExprKind::ResolveWindow,
			Expr::ResolveNamed { .. } => ExprKind::ResolveNamed,
			Expr::MemberTable { .. } => ExprKind::MemberTable,
			Expr::MethodImplementation { .. } => ExprKind::MethodImplementation,
		}
	}
}

/// Record fill for one `Class cls`, shared by window and named resolution.
///
/// Unresolvable handles keep a zeroed record apart from the handle itself.
const FILL_RECORD: &str = "\
if (cls && object_isClass((id)cls)) { \
const char *n = class_getName(cls); \
r->name = (unsigned long long)n; r->name_len = (unsigned int)strlen(n); \
r->superclass = (unsigned long long)class_getSuperclass(cls); \
r->flags = 2u | (class_isMetaClass(cls) ? 1u : 0u); \
unsigned int pc = 0; Protocol * __unsafe_unretained *ps = class_copyProtocolList(cls, &pc); \
unsigned long long *refs = (unsigned long long *)calloc(pc ? pc * 2 : 1, 8); \
for (unsigned int j = 0; j < pc; j++) { const char *pn = protocol_getName(ps[j]); \
refs[j * 2] = (unsigned long long)pn; refs[j * 2 + 1] = strlen(pn); } \
free(ps); r->protocols = (unsigned long long)refs; r->protocol_count = pc; }";

const RECORD_TYPEDEF: &str = "typedef struct { unsigned long long handle, name, superclass, protocols; \
unsigned int name_len, flags, protocol_count, reserved; } objscope_record_t;";

impl fmt::Display for Expr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Expr::ClassList => f.write_str(
				"({ unsigned int count = 0; Class *classes = objc_copyClassList(&count); \
				 unsigned long long *out = (unsigned long long *)malloc(8 * (count + 1)); \
				 out[0] = count; \
				 for (unsigned int i = 0; i < count; i++) out[i + 1] = (unsigned long long)classes[i]; \
				 free(classes); (unsigned long long)out; })",
			),
			Expr::ResolveWindow { handles } => {
				let count = handles.len();
				write!(f, "({{ {RECORD_TYPEDEF} unsigned long long hs[{}] = {{", count.max(1))?;
				for (i, h) in handles.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{h}")?;
				}
				if handles.is_empty() {
					f.write_str("0")?;
				}
				write!(
					f,
					"}}; unsigned long long *buf = (unsigned long long *)calloc(1, 8 + {count} * {ENTITY_RECORD_SIZE}); \
					 buf[0] = {count}; objscope_record_t *recs = (objscope_record_t *)(buf + 1); \
					 for (unsigned int i = 0; i < {count}; i++) {{ objscope_record_t *r = &recs[i]; \
					 r->handle = hs[i]; Class cls = (Class)hs[i]; {FILL_RECORD} }} \
					 (unsigned long long)buf; }})"
				)
			}
			Expr::ResolveNamed { name } => write!(
				f,
				"({{ {RECORD_TYPEDEF} Class cls = (Class)NSClassFromString(@\"{}\"); \
				 unsigned long long *buf = (unsigned long long *)calloc(1, 8 + {ENTITY_RECORD_SIZE}); \
				 buf[0] = cls ? 1 : 0; objscope_record_t *r = (objscope_record_t *)(buf + 1); \
				 r->handle = (unsigned long long)cls; {FILL_RECORD} (unsigned long long)buf; }})",
				escape(name)
			),
			Expr::MemberTable { handle } => write!(
				f,
				"({{ Class cls = (Class){handle}; Class meta = object_getClass((id)cls); \
				 unsigned int mc = 0, cc = 0, ic = 0, pc = 0; \
				 Method *ms = class_copyMethodList(cls, &mc); Method *cms = class_copyMethodList(meta, &cc); \
				 Ivar *is = class_copyIvarList(cls, &ic); objc_property_t *ps = class_copyPropertyList(cls, &pc); \
				 unsigned long long *m = (unsigned long long *)calloc((mc + cc) ? (mc + cc) : 1, {METHOD_ENTRY_SIZE}); \
				 for (unsigned int k = 0; k < mc + cc; k++) {{ Method x = k < mc ? ms[k] : cms[k - mc]; \
				 const char *s = sel_getName(method_getName(x)); const char *t = method_getTypeEncoding(x); \
				 m[k * 5] = (unsigned long long)s; m[k * 5 + 1] = strlen(s); \
				 m[k * 5 + 2] = (unsigned long long)t; m[k * 5 + 3] = t ? strlen(t) : 0; \
				 m[k * 5 + 4] = (unsigned long long)method_getImplementation(x); }} \
				 unsigned long long *v = (unsigned long long *)calloc(ic ? ic : 1, {IVAR_ENTRY_SIZE}); \
				 for (unsigned int k = 0; k < ic; k++) {{ const char *s = ivar_getName(is[k]); \
				 const char *t = ivar_getTypeEncoding(is[k]); \
				 v[k * 5] = (unsigned long long)s; v[k * 5 + 1] = s ? strlen(s) : 0; \
				 v[k * 5 + 2] = (unsigned long long)t; v[k * 5 + 3] = t ? strlen(t) : 0; \
				 v[k * 5 + 4] = (unsigned long long)ivar_getOffset(is[k]); }} \
				 unsigned long long *p = (unsigned long long *)calloc(pc ? pc : 1, {PROPERTY_ENTRY_SIZE}); \
				 for (unsigned int k = 0; k < pc; k++) {{ const char *s = property_getName(ps[k]); \
				 const char *a = property_getAttributes(ps[k]); \
				 p[k * 4] = (unsigned long long)s; p[k * 4 + 1] = strlen(s); \
				 p[k * 4 + 2] = (unsigned long long)a; p[k * 4 + 3] = a ? strlen(a) : 0; }} \
				 free(ms); free(cms); free(is); free(ps); \
				 unsigned long long *buf = (unsigned long long *)calloc(5, 8); buf[0] = 1; \
				 buf[1] = (unsigned long long)m; buf[2] = (unsigned long long)v; buf[3] = (unsigned long long)p; \
				 unsigned short *counts = (unsigned short *)(buf + 4); \
				 counts[0] = mc; counts[1] = cc; counts[2] = ic; counts[3] = pc; \
				 (unsigned long long)buf; }})"
			),
			Expr::MethodImplementation {
				class_name,
				selector,
				class_method,
			} => write!(
				f,
				"({{ Class cls = (Class)NSClassFromString(@\"{}\"); \
				 SEL sel = cls ? (SEL)NSSelectorFromString(@\"{}\") : (SEL)0; \
				 Class lookup = ({} && cls) ? object_getClass((id)cls) : cls; \
				 IMP imp = (lookup && sel) ? class_getMethodImplementation(lookup, sel) : (IMP)0; \
				 if (imp == (IMP)_objc_msgForward) imp = (IMP)0; \
				 unsigned long long *buf = (unsigned long long *)calloc(5, 8); buf[0] = 1; \
				 buf[1] = (unsigned long long)cls; buf[2] = (unsigned long long)sel; \
				 buf[3] = (unsigned long long)lookup; buf[4] = (unsigned long long)imp; \
				 (unsigned long long)buf; }})",
				escape(class_name),
				escape(selector),
				u8::from(*class_method)
			),
		}
	}
}

/// Escapes a string for embedding inside an `@"..."` literal.
fn escape(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	for c in s.chars() {
		match c {
			'"' => out.push_str("\\\""),
			'\\' => out.push_str("\\\\"),
			'\n' => out.push_str("\\n"),
			c => out.push(c),
		}
	}
	out
}
