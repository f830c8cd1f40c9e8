use proc_macro::{self, TokenStream};
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Ident};

///
/// A derive macro which generates a fieldless tag enum for a message enum.
///
/// For an enum `Foo` it emits `FooType` with one variant per variant of `Foo`,
/// a `FooType::ALL` table, `FooType::name()` and `Foo::message_type()`. The
/// tag is what handler registries key on, so it must never carry data.
///
/// usage:
/// ```rust
/// #[derive(MessageKind)]
/// ```
///
#[proc_macro_derive(MessageKind)]
pub fn message_kind(input: TokenStream) -> TokenStream {
    let DeriveInput {
        ident, vis, data, ..
    } = parse_macro_input!(input);
    let variants = match data {
        Data::Enum(enum_item) => enum_item.variants,
        _ => panic!("MessageKind only works on Enums"),
    };
    let tag_ident = Ident::new(&format!("{}Type", ident), Span::call_site());

    let names: Vec<&Ident> = variants.iter().map(|variant| &variant.ident).collect();
    let name_strings: Vec<String> = names.iter().map(|name| name.to_string()).collect();
    let count = names.len();

    // one match arm per variant, ignoring whatever payload it carries
    let arms = variants.iter().map(|variant| {
        let name = &variant.ident;
        match variant.fields {
            Fields::Unit => quote! { #ident::#name => #tag_ident::#name },
            Fields::Unnamed(_) => quote! { #ident::#name(..) => #tag_ident::#name },
            Fields::Named(_) => quote! { #ident::#name { .. } => #tag_ident::#name },
        }
    });

    let output = quote! {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #vis enum #tag_ident {
            #(#names),*
        }

        impl #tag_ident {
            pub const ALL: [#tag_ident; #count] = [#(#tag_ident::#names),*];

            pub fn name(&self) -> &'static str {
                match self {
                    #(#tag_ident::#names => #name_strings),*
                }
            }
        }

        impl std::fmt::Display for #tag_ident {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl #ident {
            pub fn message_type(&self) -> #tag_ident {
                match self {
                    #(#arms),*
                }
            }
        }
    };
    output.into()
}
